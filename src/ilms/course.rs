//! Courses and the paginated lists on a course's pages.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::html::{self, Row};
use super::pages::{Announcement, CoursePage, Discussion, Homework, Material};
use super::{Item, ItemRef, Session, SiteError};
use crate::engine::Discovery;
use crate::util::compile_static_regex;

static DIV_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)<div\b([^>]*)>\s*<a\b([^>]*)>(.*?)</a>")
});
static VMIDDLE_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<img\b[^>]*\bclass\s*=\s*["']vmiddle["']"#)
});
static HISTORY_BACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<input\b[^>]*\bonclick\s*=\s*["']history\.back\(\)["'][^>]*>"#)
});

pub(crate) const COURSE_PATH: &str = "/course.php";

/// A course (歷年課程檔案).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course id.
    pub id: i64,
    /// Course serial (科號); `--` when unknown.
    pub serial: String,
    /// Whether the logged in user administers the course.
    pub is_admin: bool,
    /// Course name.
    pub name: String,
}

/// Walks `course.php?courseID=..&f=<list>&page=N` until the table is empty
/// or the pager has no "Next" link.
struct Pager<'a> {
    cx: &'a Session,
    course_id: i64,
    list: &'static str,
    next: Option<u32>,
}

impl<'a> Pager<'a> {
    fn new(cx: &'a Session, course_id: i64, list: &'static str) -> Self {
        Self {
            cx,
            course_id,
            list,
            next: Some(1),
        }
    }

    async fn next_page(&mut self) -> Result<Option<String>, SiteError> {
        let Some(page) = self.next.take() else {
            return Ok(None);
        };
        let fetched = self
            .cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", self.course_id.to_string()),
                    ("f", self.list.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;
        if html::table_is_empty(&fetched.body) {
            debug!(list = self.list, page, "empty list page");
            return Ok(None);
        }
        self.next = match html::next_page(&fetched.body) {
            None => None,
            Some(next) if next == page + 1 => Some(next),
            Some(next) => {
                return Err(SiteError::cannot_understand(
                    fetched.url.as_str(),
                    format!("pager jumps from page {page} to {next}"),
                ));
            }
        };
        Ok(Some(fetched.body))
    }
}

/// Data rows of the main block; an absent block has no rows.
fn main_rows(body: &str) -> Vec<Row> {
    html::main_block(body)
        .map(|main| html::rows(&main).into_iter().filter(Row::is_data).collect())
        .unwrap_or_default()
}

fn first_link(cell: Option<&String>) -> Option<html::Link> {
    html::links(cell?).into_iter().next()
}

fn malformed(list: &str, detail: &str) -> SiteError {
    SiteError::cannot_understand(format!("{COURSE_PATH}?f={list}"), detail)
}

pub(crate) fn parse_announcements(
    body: &str,
    course: &ItemRef,
) -> Result<Vec<Announcement>, SiteError> {
    main_rows(body)
        .iter()
        .map(|row| {
            let id = first_link(row.cells.first())
                .and_then(|link| html::query_id(&link.href, "newsID"))
                .ok_or_else(|| malformed("news", "announcement row without newsID"))?;
            let title = first_link(row.cells.get(1))
                .map(|link| link.text)
                .ok_or_else(|| malformed("news", "announcement row without title"))?;
            Ok(Announcement {
                id,
                title,
                course: course.clone(),
            })
        })
        .collect()
}

pub(crate) fn parse_materials(body: &str, course: &ItemRef) -> Result<Vec<Material>, SiteError> {
    let mut materials = Vec::new();
    for row in main_rows(body) {
        let Some(caps) = row.cells.get(1).and_then(|cell| DIV_LINK_RE.captures(cell)) else {
            continue;
        };
        let kind = html::attributes(&caps[1])
            .remove("class")
            .unwrap_or_default();
        let href = html::attributes(&caps[2])
            .remove("href")
            .unwrap_or_default();
        // Linked material from another course points elsewhere.
        if html::href_path(&href).as_deref() != Some(COURSE_PATH)
            || html::query_param(&href, "f").as_deref() != Some("doc")
        {
            continue;
        }
        let id = html::query_id(&href, "cid")
            .ok_or_else(|| malformed("doclist", "material link without cid"))?;
        materials.push(Material {
            id,
            title: html::text(&caps[3]),
            material_type: kind,
            course: course.clone(),
        });
    }
    Ok(materials)
}

pub(crate) fn parse_discussions(
    body: &str,
    course: &ItemRef,
) -> Result<Vec<Discussion>, SiteError> {
    main_rows(body)
        .iter()
        // Threads attached to a homework or material carry an icon.
        .filter(|row| !row.cells.iter().any(|cell| VMIDDLE_IMG_RE.is_match(cell)))
        .map(|row| {
            let id = first_link(row.cells.first())
                .and_then(|link| html::query_id(&link.href, "tid"))
                .ok_or_else(|| malformed("forumlist", "discussion row without tid"))?;
            let title = first_link(row.cells.get(1))
                .map(|link| link.text)
                .ok_or_else(|| malformed("forumlist", "discussion row without title"))?;
            Ok(Discussion {
                id,
                title,
                course: course.clone(),
            })
        })
        .collect()
}

pub(crate) fn parse_homeworks(body: &str, course: &ItemRef) -> Result<Vec<Homework>, SiteError> {
    main_rows(body)
        .iter()
        .filter_map(|row| first_link(row.cells.get(1)))
        .map(|link| {
            let id = html::query_id(&link.href, "hw")
                .ok_or_else(|| malformed("hwlist", "homework link without hw id"))?;
            Ok(Homework {
                id,
                title: link.text,
                course: course.clone(),
            })
        })
        .collect()
}

impl Course {
    /// Lists every page of the course, then saves the syllabus.
    #[instrument(skip_all, fields(course = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let course = ItemRef::course(self.id);

        let mut pager = Pager::new(cx, self.id, "news");
        while let Some(body) = pager.next_page().await? {
            for child in parse_announcements(&body, &course)? {
                found.push(Item::Announcement(child));
            }
        }

        let mut pager = Pager::new(cx, self.id, "doclist");
        while let Some(body) = pager.next_page().await? {
            for child in parse_materials(&body, &course)? {
                found.push(Item::Material(child));
            }
        }

        let mut pager = Pager::new(cx, self.id, "forumlist");
        while let Some(body) = pager.next_page().await? {
            for child in parse_discussions(&body, &course)? {
                found.push(Item::Discussion(child));
            }
        }

        let mut pager = Pager::new(cx, self.id, "hwlist");
        while let Some(body) = pager.next_page().await? {
            for child in parse_homeworks(&body, &course)? {
                found.push(Item::Homework(child));
            }
        }

        let score = cx
            .page(
                COURSE_PATH,
                &[("f", "score".to_string()), ("courseID", self.id.to_string())],
            )
            .await?;
        if html::main_block(&score.body).is_some_and(|main| !HISTORY_BACK_RE.is_match(&main)) {
            found.push(Item::Score(CoursePage {
                course: course.clone(),
            }));
        }

        let groups = cx
            .page(
                COURSE_PATH,
                &[
                    ("f", "grouplist".to_string()),
                    ("courseID", self.id.to_string()),
                ],
            )
            .await?;
        if html::main_block(&groups.body).is_some() && !html::table_is_empty(&groups.body) {
            found.push(Item::GroupList(CoursePage { course }));
        }

        let syllabus = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", self.id.to_string()),
                    ("f", "syllabus".to_string()),
                ],
            )
            .await?;
        let main = html::main_section(syllabus.url.as_str(), &syllabus.body)?;
        cx.save("Course", self.id, "index.html", main).await?;
        Ok(())
    }
}
