//! Seed discovery: the courses a run starts from.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument};

use super::course::COURSE_PATH;
use super::html;
use super::{Course, Session, SiteError};
use crate::util::compile_static_regex;

static POINTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<span\b[^>]*\bclass\s*=\s*["']pointer["'][^>]*>(.*?)</span>"#)
});
static EDIT_DOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)<a\b[^>]*\bhref\s*=\s*["']javascript:editDoc\(1\)["']"#)
});
static BOLD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a\b[^>]*>\s*<b\b"));
static COURSE_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^/course/(\d+)"));
static PAGE_COMBO_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<input\b[^>]*\bid\s*=\s*["']PageCombo["'][^>]*>([^<]*)"#)
});
static PAGE_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<span\b[^>]*\bclass\s*=\s*["']item["'][^>]*>\s*<a\b([^>]*)>"#)
});

const COURSE_LOGIN_PATH: &str = "/course_login.php";

/// A positional course argument: an id, `enrolled` or `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseSelector {
    /// A single course by id.
    Id(i64),
    /// Every course the logged in user is enrolled in.
    Enrolled,
    /// Every open course on the site.
    Open,
}

impl FromStr for CourseSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrolled" => Ok(Self::Enrolled),
            "open" => Ok(Self::Open),
            _ if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
                .parse()
                .map(Self::Id)
                .map_err(|_| format!("course id out of range: {s}")),
            _ => Err(r#"must be a number, "enrolled" or "open""#.to_string()),
        }
    }
}

impl fmt::Display for CourseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Enrolled => f.write_str("enrolled"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// Reads a course from its syllabus page.
pub(crate) fn parse_course(id: i64, body: &str) -> Result<Course, SiteError> {
    let name = POINTER_RE
        .captures(body)
        .map(|caps| html::text(&caps[1]))
        .ok_or_else(|| {
            SiteError::cannot_understand(format!("{COURSE_PATH}?courseID={id}"), "course name not found")
        })?;
    let is_admin = html::main_block(body).is_some_and(|main| EDIT_DOC_RE.is_match(&main));
    Ok(Course {
        id,
        serial: "--".to_string(),
        is_admin,
        name,
    })
}

/// Reads the `listTD` links of `home.php?f=allcourse`.
pub(crate) fn parse_enrolled(url: &str, body: &str) -> Result<Vec<Course>, SiteError> {
    if html::bare_notice(body).is_some() {
        return Err(SiteError::User(
            "Cannot get enrolled courses. Are you logged in?".to_string(),
        ));
    }
    let mut courses = Vec::new();
    for row in html::rows(body) {
        for (i, cell) in row.cells.iter().enumerate() {
            if row.cell_class(i) != Some("listTD") {
                continue;
            }
            for link in html::links(cell) {
                let id = COURSE_HREF_RE
                    .captures(&link.href)
                    .and_then(|caps| caps[1].parse().ok())
                    .ok_or_else(|| {
                        SiteError::cannot_understand(url, format!("course URL {}", link.href))
                    })?;
                courses.push(Course {
                    id,
                    serial: row.cells.first().map(|c| html::text(c)).unwrap_or_default(),
                    is_admin: BOLD_LINK_RE.is_match(cell),
                    name: link.text,
                });
            }
        }
    }
    Ok(courses)
}

/// Total page count of the open course index.
pub(crate) fn parse_total_pages(body: &str) -> Option<u32> {
    if let Some(caps) = PAGE_COMBO_RE.captures(body) {
        return caps[1].rsplit('/').next()?.trim().parse().ok();
    }
    PAGE_ITEM_RE
        .captures_iter(body)
        .filter_map(|caps| html::attributes(&caps[1]).remove("href"))
        .filter_map(|href| html::query_param(&href, "page")?.parse().ok())
        .max()
}

/// Reads one page of the open course index.
pub(crate) fn parse_open_courses(body: &str) -> Vec<Course> {
    let mut courses = Vec::new();
    for row in html::table_box_rows(body) {
        for (i, cell) in row.cells.iter().enumerate() {
            for link in html::links(cell) {
                if !link.href.starts_with("/course/") {
                    continue;
                }
                let Some(id) = link
                    .href
                    .rsplit('/')
                    .next()
                    .and_then(|tail| tail.parse().ok())
                else {
                    continue;
                };
                let serial = i
                    .checked_sub(1)
                    .and_then(|prev| row.cells.get(prev))
                    .map(|c| html::text(c))
                    .unwrap_or_default();
                courses.push(Course {
                    id,
                    serial,
                    is_admin: false,
                    name: link.text,
                });
            }
        }
    }
    courses
}

impl Session {
    /// Looks up one course by id.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::User`] if the course is not accessible or does
    /// not exist.
    #[instrument(skip(self))]
    pub async fn get_course(&self, id: i64) -> Result<Course, SiteError> {
        let page = self
            .page(
                COURSE_PATH,
                &[("courseID", id.to_string()), ("f", "syllabus".to_string())],
            )
            .await?;
        if page.url.path() == COURSE_LOGIN_PATH {
            return Err(SiteError::User(format!(
                "No access to course: course_id={id}"
            )));
        }
        if page.body.is_empty() {
            return Err(SiteError::User(format!(
                "Empty response returned for course, the course probably doesn't exist: course_id={id}"
            )));
        }
        parse_course(id, &page.body)
    }

    /// Courses the logged in user is enrolled in.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::User`] if the session is not logged in.
    #[instrument(skip(self))]
    pub async fn enrolled_courses(&self) -> Result<Vec<Course>, SiteError> {
        let page = self
            .page("/home.php", &[("f", "allcourse".to_string())])
            .await?;
        parse_enrolled(page.url.as_str(), &page.body)
    }

    /// Every open course of the current term.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Transport`] if an index page cannot be fetched.
    #[instrument(skip(self))]
    pub async fn open_courses(&self) -> Result<Vec<Course>, SiteError> {
        let mut courses = Vec::new();
        let mut total = 1;
        let mut page = 1;
        while page <= total {
            info!(page, total, "Indexing open courses");
            let fetched = self
                .page(
                    "/course/index.php",
                    &[
                        ("nav", "course".to_string()),
                        ("t", "open".to_string()),
                        ("term", "-1".to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            if let Some(pages) = parse_total_pages(&fetched.body) {
                total = total.max(pages);
            }
            courses.extend(parse_open_courses(&fetched.body));
            page += 1;
        }
        Ok(courses)
    }

    /// Resolves positional selectors to courses, in order.
    ///
    /// # Errors
    ///
    /// Propagates the first lookup failure.
    pub async fn resolve_courses(
        &self,
        selectors: &[CourseSelector],
    ) -> Result<Vec<Course>, SiteError> {
        let mut courses = Vec::new();
        for selector in selectors {
            match selector {
                CourseSelector::Id(id) => courses.push(self.get_course(*id).await?),
                CourseSelector::Enrolled => courses.extend(self.enrolled_courses().await?),
                CourseSelector::Open => courses.extend(self.open_courses().await?),
            }
        }
        Ok(courses)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_parse() {
        assert_eq!("74".parse::<CourseSelector>(), Ok(CourseSelector::Id(74)));
        assert_eq!("enrolled".parse::<CourseSelector>(), Ok(CourseSelector::Enrolled));
        assert_eq!("open".parse::<CourseSelector>(), Ok(CourseSelector::Open));
        assert!("-1".parse::<CourseSelector>().is_err());
        assert!("all".parse::<CourseSelector>().is_err());
        assert!("".parse::<CourseSelector>().is_err());
    }

    #[test]
    fn test_parse_course() {
        let body = r#"<html><body><span class="pointer">Intro to CS</span>
<div id="main"><a href="javascript:editDoc(1)">edit</a></div></body></html>"#;
        let course = parse_course(74, body).unwrap();
        assert_eq!(course.name, "Intro to CS");
        assert_eq!(course.serial, "--");
        assert!(course.is_admin);

        let plain = r#"<span class="pointer">Intro</span><div id="main"></div>"#;
        assert!(!parse_course(74, plain).unwrap().is_admin);
        assert!(parse_course(74, "<p></p>").is_err());
    }

    #[test]
    fn test_parse_enrolled() {
        let body = r#"<html><body><table>
<tr><td>10910CS100</td><td class="listTD"><a href="/course/74"><b>Taught</b></a></td></tr>
<tr><td>10910CS200</td><td class="listTD"><a href="/course/75">Taken</a></td></tr>
</table></body></html>"#;
        let courses = parse_enrolled("u", body).unwrap();
        let got: Vec<_> = courses
            .iter()
            .map(|c| (c.id, c.serial.as_str(), c.is_admin, c.name.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (74, "10910CS100", true, "Taught"),
                (75, "10910CS200", false, "Taken")
            ]
        );
    }

    #[test]
    fn test_parse_enrolled_not_logged_in() {
        let err = parse_enrolled("u", "<html><body><div>Please login</div></body></html>")
            .unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(
            parse_total_pages(r#"<input id="PageCombo" value="1"> / 12"#),
            Some(12)
        );
        let pager = r#"<span class="page"><span class="item"><a href="?page=2">2</a></span><span class="item"><a href="?page=3">3</a></span></span>"#;
        assert_eq!(parse_total_pages(pager), Some(3));
        assert_eq!(parse_total_pages("<p/>"), None);
    }

    #[test]
    fn test_parse_open_courses() {
        let body = r#"<div class="tableBox"><table>
<tr class="header"><td>Serial</td><td>Name</td></tr>
<tr class="row"><td><div title="10910CS100">10910CS100</div></td><td><a href="/course/74">Intro</a></td></tr>
</table></div>"#;
        let courses = parse_open_courses(body);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].id, 74);
        assert_eq!(courses[0].serial, "10910CS100");
        assert_eq!(courses[0].name, "Intro");
        assert!(!courses[0].is_admin);
    }
}
