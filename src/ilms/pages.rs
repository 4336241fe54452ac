//! Course pages: announcements, materials, discussions and homework.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::course::COURSE_PATH;
use super::html;
use super::{Attachment, Item, ItemRef, Session, SiteError, Video};
use crate::engine::Discovery;
use crate::util::compile_static_regex;

static IMG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?i)<img\b[^>]*>"));
static VIDEO_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?i)<video\b[^>]*>"));
static TITLE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?is)<div\b[^>]*>\s*(?:<[^a/][^>]*>\s*)*<a\b([^>]*)>(.*?)</a>")
});

const COMMENT_ICON: &str = "/sys/res/icon/hw_comment.png";

/// 課程活動 (公告): a course announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// `newsID`.
    pub id: i64,
    /// Title as listed.
    pub title: String,
    /// Owning course.
    pub course: ItemRef,
}

/// 上課教材: a material page, possibly with a recorded lecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    /// `cid`.
    pub id: i64,
    /// Title as listed.
    pub title: String,
    /// `Econtent` or `Epowercam`.
    pub material_type: String,
    /// Owning course.
    pub course: ItemRef,
}

/// 討論區: a discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    /// `tid`.
    pub id: i64,
    /// Thread subject.
    pub title: String,
    /// Owning course.
    pub course: ItemRef,
}

/// 作業: a homework assignment and its submission list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Homework {
    /// `hw`.
    pub id: i64,
    /// Title as listed.
    pub title: String,
    /// Owning course.
    pub course: ItemRef,
}

/// One entry of a homework's submission list (作業 > 已交名單).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedHomework {
    /// `cid` of the submission page.
    pub id: i64,
    /// Submission title.
    pub title: String,
    /// Student or group name.
    pub by: String,
    /// Owning course.
    pub course: ItemRef,
    /// Teacher's comment, if one is attached.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A single course page saved as is: the score page or the group list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoursePage {
    /// Owning course; its id is the page's identity.
    pub course: ItemRef,
}

fn attachments(type_tag: &str, id: i64, fragment: &str) -> Vec<Attachment> {
    html::attachment_links(fragment)
        .into_iter()
        .map(|(attachment_id, title)| Attachment {
            id: attachment_id,
            title,
            parent: ItemRef::new(type_tag, id),
        })
        .collect()
}

/// Attachments of an announcement's JSON document.
pub(crate) fn announcement_attachments(
    url: &Url,
    body: &Value,
    id: i64,
) -> Result<Vec<Attachment>, SiteError> {
    let news = body
        .get("news")
        .filter(|news| news.is_object())
        .ok_or_else(|| SiteError::cannot_understand(url.as_str(), "missing news object"))?;
    if news["note"] == "NA" && news["poster"] == "" {
        return Err(SiteError::unavailable(url.as_str(), body.to_string()));
    }
    Ok(news["attach"]
        .as_str()
        .map(|fragment| attachments("Announcement", id, fragment))
        .unwrap_or_default())
}

/// Attachments of a discussion's JSON document.
pub(crate) fn discussion_attachments(
    url: &Url,
    body: &Value,
    id: i64,
) -> Result<Vec<Attachment>, SiteError> {
    let posts = &body["posts"];
    if posts["status"] != "true" {
        return Err(SiteError::cannot_understand(url.as_str(), body.to_string()));
    }
    let mut found = Vec::new();
    for post in posts["items"].as_array().into_iter().flatten() {
        for attach in post["attach"].as_array().into_iter().flatten() {
            let attachment_id = match &attach["id"] {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| {
                SiteError::cannot_understand(url.as_str(), format!("bad attachment id: {attach}"))
            })?;
            let title = attach["srcName"].as_str().ok_or_else(|| {
                SiteError::cannot_understand(url.as_str(), format!("attachment without srcName: {attach}"))
            })?;
            found.push(Attachment {
                id: attachment_id,
                title: title.to_string(),
                parent: ItemRef::new("Discussion", id),
            });
        }
    }
    Ok(found)
}

/// The video described by a `http_get_media.php` response, if it is ready.
///
/// A null `player_width` means the site is still transcoding.
pub(crate) fn media_video(
    url: &Url,
    body: &Value,
    page_url: &Url,
    id: i64,
) -> Result<Option<Video>, SiteError> {
    let ret = &body["ret"];
    if ret["status"] != "true" {
        return Err(SiteError::cannot_understand(
            url.as_str(),
            format!("video not found for Material-{id}: {body}"),
        ));
    }
    if ret["player_width"].is_null() {
        debug!(material = id, "video still transcoding");
        return Ok(None);
    }
    let src = ret["embed"]
        .as_str()
        .and_then(|embed| VIDEO_RE.find(embed))
        .and_then(|tag| html::attributes(tag.as_str()).remove("src"))
        .ok_or_else(|| SiteError::cannot_understand(url.as_str(), "embed without <video src>"))?;
    let video = page_url.join(&src).map_err(|source| SiteError::Url { url: src, source })?;
    Ok(Some(Video {
        id,
        url: video.to_string(),
    }))
}

/// Submissions listed in the main block of a `hw_doclist` page.
///
/// Columns are located through the header's sort links (`order=title`,
/// `order=name`).
pub(crate) fn parse_submissions(
    url: &Url,
    main: &str,
    course: &ItemRef,
) -> Result<Vec<SubmittedHomework>, SiteError> {
    let rows = html::table_box_rows(main);
    let header = rows
        .iter()
        .find(|row| row.is_header())
        .ok_or_else(|| SiteError::cannot_understand(url.as_str(), "submission list without header"))?;
    let columns: HashMap<String, usize> = header
        .cells
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| {
            let link = html::links(cell).into_iter().next()?;
            Some((html::query_param(&link.href, "order")?, i))
        })
        .collect();
    let column = |name: &str| {
        columns.get(name).copied().ok_or_else(|| {
            SiteError::cannot_understand(url.as_str(), format!("submission list without {name} column"))
        })
    };
    let title_col = column("title")?;
    let name_col = column("name")?;

    let mut found = Vec::new();
    for row in rows.iter().filter(|row| row.is_data()) {
        let Some(title_cell) = row.cells.get(title_col) else {
            continue;
        };
        let Some(caps) = TITLE_LINK_RE.captures(title_cell) else {
            continue;
        };
        let href = html::attributes(&caps[1]).remove("href").unwrap_or_default();
        let id = html::query_id(&href, "cid").ok_or_else(|| {
            SiteError::cannot_understand(url.as_str(), format!("submission link without cid: {href}"))
        })?;
        let comment = IMG_RE
            .find_iter(title_cell)
            .map(|img| html::attributes(img.as_str()))
            .find(|attrs| attrs.get("src").map(String::as_str) == Some(COMMENT_ICON))
            .and_then(|mut attrs| attrs.remove("title"));
        let by = row
            .cells
            .get(name_col)
            .map(|cell| html::text(cell))
            .unwrap_or_default();
        found.push(SubmittedHomework {
            id,
            title: html::text(&caps[2]),
            by,
            course: course.clone(),
            comment,
        });
    }
    Ok(found)
}

impl Announcement {
    #[instrument(skip_all, fields(announcement = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let (url, body) = cx
            .json(
                "/home/http_event_select.php",
                &[("id", self.id.to_string()), ("type", "n".to_string())],
            )
            .await?;
        for attachment in announcement_attachments(&url, &body, self.id)? {
            found.push(Item::Attachment(attachment));
        }
        cx.save("Announcement", self.id, "index.json", body.to_string())
            .await?;
        Ok(())
    }
}

impl Material {
    #[instrument(skip_all, fields(material = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let page = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", self.course.id().to_string()),
                    ("f", "doc".to_string()),
                    ("cid", self.id.to_string()),
                ],
            )
            .await?;
        let main = html::main_section(page.url.as_str(), &page.body)?;
        for attachment in attachments("Material", self.id, &main) {
            found.push(Item::Attachment(attachment));
        }

        if self.material_type == "Epowercam" {
            let (url, body) = cx
                .json(
                    "/sys/http_get_media.php",
                    &[
                        ("id", self.id.to_string()),
                        ("db_table", "content".to_string()),
                        ("flash_installed", "false".to_string()),
                        ("swf_id", format!("swfslide{}", self.id)),
                        ("area_size", "724x3".to_string()),
                    ],
                )
                .await?;
            if let Some(video) = media_video(&url, &body, &page.url, self.id)? {
                found.push(Item::Video(video));
            }
        }

        cx.save("Material", self.id, "index.html", main).await?;
        Ok(())
    }
}

impl Discussion {
    #[instrument(skip_all, fields(discussion = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let (url, body) = cx
            .json("/sys/lib/ajax/post.php", &[("id", self.id.to_string())])
            .await?;
        for attachment in discussion_attachments(&url, &body, self.id)? {
            found.push(Item::Attachment(attachment));
        }
        cx.save("Discussion", self.id, "index.json", body.to_string())
            .await?;
        Ok(())
    }
}

impl Homework {
    #[instrument(skip_all, fields(homework = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let course_id = self.course.id().to_string();

        let page = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", course_id.clone()),
                    ("f", "hw".to_string()),
                    ("hw", self.id.to_string()),
                ],
            )
            .await?;
        let main = html::strip_tool_wrappers(&html::main_section(page.url.as_str(), &page.body)?);
        for attachment in attachments("Homework", self.id, &main) {
            found.push(Item::Attachment(attachment));
        }
        cx.save("Homework", self.id, "index.html", main).await?;

        let list = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", course_id),
                    ("f", "hw_doclist".to_string()),
                    ("hw", self.id.to_string()),
                ],
            )
            .await?;
        let main = html::main_section(list.url.as_str(), &list.body)?;
        if html::table_is_empty(&main) {
            return Ok(());
        }
        for submission in parse_submissions(&list.url, &main, &self.course)? {
            found.push(Item::SubmittedHomework(submission));
        }
        cx.save("Homework", self.id, "list.html", main).await?;
        Ok(())
    }
}

impl SubmittedHomework {
    #[instrument(skip_all, fields(submission = self.id))]
    pub(crate) async fn expand(
        &self,
        cx: &Session,
        found: &mut Discovery<'_, Item>,
    ) -> Result<(), SiteError> {
        let page = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", self.course.id().to_string()),
                    ("f", "doc".to_string()),
                    ("cid", self.id.to_string()),
                ],
            )
            .await?;
        let main = html::main_section(page.url.as_str(), &page.body)?;
        for attachment in attachments("SubmittedHomework", self.id, &main) {
            found.push(Item::Attachment(attachment));
        }
        cx.save("SubmittedHomework", self.id, "index.html", main)
            .await?;
        Ok(())
    }
}

impl CoursePage {
    /// Saves the main block of `course.php?f=<f>` as `index.html`.
    pub(crate) async fn save(
        &self,
        cx: &Session,
        type_tag: &str,
        f: &str,
    ) -> Result<(), SiteError> {
        let page = cx
            .page(
                COURSE_PATH,
                &[
                    ("courseID", self.course.id().to_string()),
                    ("f", f.to_string()),
                ],
            )
            .await?;
        let main = html::main_section(page.url.as_str(), &page.body)?;
        cx.save(type_tag, self.course.id(), "index.html", main)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn url() -> Url {
        Url::parse("http://lms.example/x.php").unwrap()
    }

    #[test]
    fn test_announcement_attachments() {
        let body = json!({"news": {
            "note": "hello",
            "poster": "teacher",
            "attach": r#"<div><a href="/sys/read_attach.php?id=41">hw1.pdf</a></div>"#
        }});
        let found = announcement_attachments(&url(), &body, 9).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].id, found[0].title.as_str()), (41, "hw1.pdf"));
        assert_eq!(found[0].parent, ItemRef::new("Announcement", 9));
    }

    #[test]
    fn test_announcement_without_attachments() {
        let body = json!({"news": {"note": "hi", "poster": "t", "attach": null}});
        assert!(announcement_attachments(&url(), &body, 1).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_announcement_is_unavailable() {
        let body = json!({"news": {"note": "NA", "poster": "", "attach": null}});
        let err = announcement_attachments(&url(), &body, 1).unwrap_err();
        assert!(matches!(err, SiteError::Unavailable { .. }));
    }

    #[test]
    fn test_discussion_attachments_accept_string_and_number_ids() {
        let body = json!({"posts": {"status": "true", "items": [
            {"attach": [{"id": "12", "srcName": "a.zip"}]},
            {"attach": []},
            {"attach": [{"id": 13, "srcName": "b.png"}]}
        ]}});
        let found = discussion_attachments(&url(), &body, 5).unwrap();
        let got: Vec<_> = found.iter().map(|a| (a.id, a.title.as_str())).collect();
        assert_eq!(got, vec![(12, "a.zip"), (13, "b.png")]);
    }

    #[test]
    fn test_discussion_bad_status() {
        let body = json!({"posts": {"status": "false"}});
        assert!(matches!(
            discussion_attachments(&url(), &body, 5).unwrap_err(),
            SiteError::CannotUnderstand { .. }
        ));
    }

    #[test]
    fn test_media_video_resolves_relative_src() {
        let page = Url::parse("http://lms.example/course.php?courseID=1&f=doc&cid=7").unwrap();
        let body = json!({"ret": {
            "status": "true",
            "player_width": 724,
            "embed": r#"<video width="724" src="/media/7/v.mp4" controls></video>"#
        }});
        let video = media_video(&url(), &body, &page, 7).unwrap().unwrap();
        assert_eq!(video.id, 7);
        assert_eq!(video.url, "http://lms.example/media/7/v.mp4");
    }

    #[test]
    fn test_media_video_transcoding() {
        let body = json!({"ret": {"status": "true", "embed": "...", "player_width": null}});
        assert!(media_video(&url(), &body, &url(), 7).unwrap().is_none());
    }

    #[test]
    fn test_media_video_not_found() {
        let body = json!({"ret": {"status": "false"}});
        assert!(media_video(&url(), &body, &url(), 7).is_err());
    }

    const SUBMISSIONS: &str = r##"<div id="main"><div class="tableBox"><table>
<tr class="header"><td>No</td><td><a href="?order=title">Title</a></td><td>Files</td><td><a href="?order=name">Name</a></td></tr>
<tr class="row"><td>1</td><td><div><a href="/course.php?courseID=74&amp;f=doc&amp;cid=901">Report</a> <img src="/sys/res/icon/hw_comment.png" title="Good work"></div></td><td>1</td><td><div>Alice</div></td></tr>
<tr class="row"><td>2</td><td><div><a href="/course.php?courseID=74&amp;f=doc&amp;cid=902">Group report</a></div></td><td>2</td><td><div><a href="#">Team 3</a></div></td></tr>
<tr class="row"><td>3</td><td>not submitted</td><td>0</td><td><div>Bob</div></td></tr>
</table></div></div>"##;

    #[test]
    fn test_parse_submissions() {
        let found = parse_submissions(&url(), SUBMISSIONS, &ItemRef::course(74)).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, 901);
        assert_eq!(found[0].title, "Report");
        assert_eq!(found[0].by, "Alice");
        assert_eq!(found[0].comment.as_deref(), Some("Good work"));
        assert_eq!(found[1].by, "Team 3");
        assert_eq!(found[1].comment, None);
        assert_eq!(found[1].course, ItemRef::course(74));
    }

    #[test]
    fn test_parse_submissions_requires_name_column() {
        let main = SUBMISSIONS.replace("order=name", "order=date");
        assert!(parse_submissions(&url(), &main, &ItemRef::course(74)).is_err());
    }
}
