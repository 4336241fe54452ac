//! Downloadable files: attachments and lecture videos.

use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::html::ATTACHMENT_PATH;
use super::{ItemRef, Session, SiteError};

/// Characters that cannot appear in a file name on common filesystems.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turns an attachment title into a safe file name.
///
/// Only the last path component is kept. `meta.json` is renamed so it cannot
/// clobber the item's metadata file.
#[must_use]
pub fn suggest_filename(title: &str) -> String {
    let name = title.rsplit(['/', '\\']).next().unwrap_or(title);
    if name == crate::engine::META_FILE {
        return "meta_.json".to_string();
    }
    let cleaned: String = name
        .chars()
        .map(|c| if ILLEGAL.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// A file attached to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment id on `read_attach.php`.
    pub id: i64,
    /// Original file name as shown by the site.
    pub title: String,
    /// Page the attachment was found on.
    pub parent: ItemRef,
}

impl Attachment {
    /// File name the attachment is stored under.
    #[must_use]
    pub fn saved_filename(&self) -> String {
        suggest_filename(&self.title)
    }

    #[instrument(skip_all, fields(attachment = self.id))]
    pub(crate) async fn download(&self, cx: &Session) -> Result<(), SiteError> {
        let url = cx.url(ATTACHMENT_PATH, &[("id", self.id.to_string())])?;
        cx.download(url, "Attachment", self.id, &self.saved_filename())
            .await?;
        Ok(())
    }
}

/// A recorded lecture attached to an `Epowercam` material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    /// Id of the owning material.
    pub id: i64,
    /// Absolute video URL.
    pub url: String,
}

impl Video {
    /// File name every video is stored under.
    pub const FILE_NAME: &'static str = "video.mp4";

    #[instrument(skip_all, fields(video = self.id))]
    pub(crate) async fn download(&self, cx: &Session) -> Result<(), SiteError> {
        let url = Url::parse(&self.url).map_err(|source| SiteError::Url {
            url: self.url.clone(),
            source,
        })?;
        cx.download(url, "Video", self.id, Self::FILE_NAME).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggest_filename_keeps_basename() {
        assert_eq!(suggest_filename("slides/week1.pdf"), "week1.pdf");
        assert_eq!(suggest_filename(r"C:\Users\me\report.docx"), "report.docx");
    }

    #[test]
    fn test_suggest_filename_protects_meta() {
        assert_eq!(suggest_filename("meta.json"), "meta_.json");
        assert_eq!(suggest_filename("dir/meta.json"), "meta_.json");
    }

    #[test]
    fn test_suggest_filename_replaces_illegal_characters() {
        assert_eq!(suggest_filename("a<b>c:d\"e|f?g*h.txt"), "a_b_c_d_e_f_g_h.txt");
        assert_eq!(suggest_filename("tab\there"), "tab_here");
        assert_eq!(suggest_filename("作業一.pdf"), "作業一.pdf");
    }

    #[test]
    fn test_suggest_filename_never_empty() {
        assert_eq!(suggest_filename(""), "_");
        assert_eq!(suggest_filename("folder/"), "_");
        assert_eq!(suggest_filename(".."), "_");
    }
}
