//! iLMS work items: courses, their pages, and downloadable files.
//!
//! [`Item`] is the closed set of resource kinds found on an iLMS site. It
//! implements [`WorkItem`] so the engine can drain a queue of them; each
//! variant knows how to fetch itself through a [`Session`] and which children
//! its page links to.
//!
//! ```text
//! Course ─┬─ Announcement ── Attachment
//!         ├─ Material ─────┬ Attachment
//!         │                └ Video
//!         ├─ Discussion ─── Attachment
//!         ├─ Homework ─────┬ Attachment
//!         │                └ SubmittedHomework ── Attachment
//!         ├─ Score
//!         └─ GroupList
//! ```

mod auth;
mod course;
mod error;
mod files;
pub mod html;
mod pages;
mod seeds;
mod session;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use auth::CREDENTIALS_FILE;
pub use course::Course;
pub use error::SiteError;
pub use files::{Attachment, Video, suggest_filename};
pub use pages::{Announcement, CoursePage, Discussion, Homework, Material, SubmittedHomework};
pub use seeds::CourseSelector;
pub use session::{DEFAULT_TARGET_ORIGIN, Page, Session};

use crate::engine::{Discovery, WorkItem};

/// Every type tag an [`Item`] can carry, in tree order.
pub const TYPE_TAGS: &[&str] = &[
    "Course",
    "Announcement",
    "Material",
    "Discussion",
    "Homework",
    "SubmittedHomework",
    "Score",
    "GroupList",
    "Attachment",
    "Video",
];

/// Relative directory of an item: `<lowercase type tag>/<id>`.
#[must_use]
pub fn location(type_tag: &str, id: i64) -> PathBuf {
    PathBuf::from(type_tag.to_lowercase()).join(id.to_string())
}

/// A text that is not `Type-<id>`.
#[derive(Debug, Error)]
#[error("invalid item reference '{0}'")]
pub struct InvalidItemRef(String);

/// Reference from a child to its parent, stored as `"Type-<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemRef {
    type_tag: String,
    id: i64,
}

impl ItemRef {
    /// Creates a reference.
    pub fn new(type_tag: impl Into<String>, id: i64) -> Self {
        Self {
            type_tag: type_tag.into(),
            id,
        }
    }

    /// Reference to a course.
    #[must_use]
    pub fn course(id: i64) -> Self {
        Self::new("Course", id)
    }

    /// Type tag of the referenced item.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Identity of the referenced item.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_tag, self.id)
    }
}

impl FromStr for ItemRef {
    type Err = InvalidItemRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_tag, id) = s
            .rsplit_once('-')
            .ok_or_else(|| InvalidItemRef(s.to_string()))?;
        let id = id.parse().map_err(|_| InvalidItemRef(s.to_string()))?;
        if type_tag.is_empty() {
            return Err(InvalidItemRef(s.to_string()));
        }
        Ok(Self::new(type_tag, id))
    }
}

impl TryFrom<String> for ItemRef {
    type Error = InvalidItemRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemRef> for String {
    fn from(value: ItemRef) -> Self {
        value.to_string()
    }
}

/// One iLMS resource.
///
/// Serialized with an internal `"type"` tag so checkpoints restore the
/// right variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    /// 課程: a course and its syllabus.
    Course(Course),
    /// 公告: course announcement.
    Announcement(Announcement),
    /// 上課教材: course material page.
    Material(Material),
    /// 討論區: discussion thread.
    Discussion(Discussion),
    /// 作業: homework assignment.
    Homework(Homework),
    /// A student's submission to a homework.
    SubmittedHomework(SubmittedHomework),
    /// 成績計算: score page of a course.
    Score(CoursePage),
    /// 小組專區: group list page of a course.
    GroupList(CoursePage),
    /// Attached file.
    Attachment(Attachment),
    /// Recorded lecture video.
    Video(Video),
}

/// Serializes a variant's fields into a flat attribute map.
fn flatten<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl WorkItem for Item {
    type Context = Session;
    type Error = SiteError;

    fn type_tag(&self) -> &'static str {
        match self {
            Self::Course(_) => "Course",
            Self::Announcement(_) => "Announcement",
            Self::Material(_) => "Material",
            Self::Discussion(_) => "Discussion",
            Self::Homework(_) => "Homework",
            Self::SubmittedHomework(_) => "SubmittedHomework",
            Self::Score(_) => "Score",
            Self::GroupList(_) => "GroupList",
            Self::Attachment(_) => "Attachment",
            Self::Video(_) => "Video",
        }
    }

    fn stats_group(&self) -> &'static str {
        match self {
            Self::Course(_) => "Course",
            Self::Attachment(_) | Self::Video(_) => "File",
            _ => "Page",
        }
    }

    fn identity(&self) -> i64 {
        match self {
            Self::Course(c) => c.id,
            Self::Announcement(a) => a.id,
            Self::Material(m) => m.id,
            Self::Discussion(d) => d.id,
            Self::Homework(h) => h.id,
            Self::SubmittedHomework(s) => s.id,
            Self::Score(p) | Self::GroupList(p) => p.course.id(),
            Self::Attachment(a) => a.id,
            Self::Video(v) => v.id,
        }
    }

    async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Self>,
    ) -> Result<(), SiteError> {
        match self {
            Self::Course(c) => c.expand(cx, found).await,
            Self::Announcement(a) => a.expand(cx, found).await,
            Self::Material(m) => m.expand(cx, found).await,
            Self::Discussion(d) => d.expand(cx, found).await,
            Self::Homework(h) => h.expand(cx, found).await,
            Self::SubmittedHomework(s) => s.expand(cx, found).await,
            Self::Score(p) => p.save(cx, "Score", "score").await,
            Self::GroupList(p) => p.save(cx, "GroupList", "grouplist").await,
            Self::Attachment(a) => a.download(cx).await,
            Self::Video(v) => v.download(cx).await,
        }
    }

    fn attributes(&self) -> Map<String, Value> {
        match self {
            Self::Course(c) => flatten(c),
            Self::Announcement(a) => flatten(a),
            Self::Material(m) => {
                let mut map = flatten(m);
                if let Some(kind) = map.remove("material_type") {
                    map.insert("type".to_string(), kind);
                }
                map
            }
            Self::Discussion(d) => flatten(d),
            Self::Homework(h) => flatten(h),
            Self::SubmittedHomework(s) => flatten(s),
            Self::Score(p) | Self::GroupList(p) => flatten(p),
            Self::Attachment(a) => {
                let mut map = flatten(a);
                map.insert(
                    "saved_filename".to_string(),
                    Value::String(a.saved_filename()),
                );
                map
            }
            Self::Video(v) => flatten(v),
        }
    }

    fn storage_location(&self) -> PathBuf {
        location(self.type_tag(), self.identity())
    }
}
