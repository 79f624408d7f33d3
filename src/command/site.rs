use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing::info;

use crate::repository::{story::Story, Repository};

pub(crate) struct Day {
    date: NaiveDate,
    stories: Vec<Story>,
}

/// Renders the mirrored stories as a static site partitioned by `YYYY/MM/DD`.
///
/// Pages are written to a staging directory next to `output_dir` and swapped in at the end.
pub(crate) fn generate_site(database_path: &str, output_dir: &Path, max_days: Option<usize>) -> Result<()> {
    let mut repo = Repository::new(database_path)?;
    let days = group_by_day(repo.find_stories(max_days)?)?;

    let staging_dir = staging_dir(output_dir)?;
    if staging_dir.exists() {
        fs::remove_dir_all(&staging_dir)?;
    }
    fs::create_dir_all(&staging_dir)?;
    for day in &days {
        let dir = render_day(&staging_dir, day)?;
        info!("wrote {}", dir.display());
    }
    render_indices(&staging_dir, &days)?;

    if output_dir.exists() {
        fs::remove_dir_all(output_dir)?;
    }
    fs::rename(&staging_dir, output_dir)
        .with_context(|| format!("could not move site into {}", output_dir.display()))?;
    info!(days = days.len(), "site generated in {}", output_dir.display());
    Ok(())
}

fn staging_dir(output_dir: &Path) -> Result<PathBuf> {
    let name = output_dir
        .file_name()
        .with_context(|| format!("{} is not a directory name", output_dir.display()))?;
    let mut staging_name = name.to_os_string();
    staging_name.push(format!(".staging-{}", process::id()));
    Ok(output_dir.with_file_name(staging_name))
}

// Stories arrive ordered by day, so consecutive runs form the groups.
pub(crate) fn group_by_day(stories: Vec<Story>) -> Result<Vec<Day>> {
    let mut days: Vec<Day> = vec![];
    for story in stories {
        match days.last_mut() {
            Some(day) if day.stories[0].day == story.day => day.stories.push(story),
            _ => {
                let date = NaiveDate::parse_from_str(&story.day, "%Y-%m-%d")
                    .with_context(|| format!("bad story day {:?} (id={})", story.day, story.id))?;
                days.push(Day {
                    date,
                    stories: vec![story],
                });
            }
        }
    }
    Ok(days)
}

fn render_day(root: &Path, day: &Day) -> Result<PathBuf> {
    let (year, month, date) = date_parts(day.date);
    let dir = root.join(&year).join(&month).join(&date);
    fs::create_dir_all(&dir)?;
    let breadcrumbs = [
        ("root", None, Some("../../../")),
        ("year", Some(year.as_str()), Some("../../")),
        ("month", Some(month.as_str()), Some("../")),
        ("day", Some(date.as_str()), None),
    ];
    let body = day
        .stories
        .iter()
        .map(render_story)
        .collect::<Vec<String>>()
        .join("\n");
    let title = day.date.format("%A, %B %-d, %Y").to_string();
    fs::write(
        dir.join("index.html"),
        page(&title, &breadcrumbs, &format!("<ol class=\"stories\">\n{}\n</ol>", body)),
    )?;
    Ok(dir)
}

fn render_story(story: &Story) -> String {
    let discussion = format!("https://news.ycombinator.com/item?id={}", story.id);
    let link = story.url.as_deref().unwrap_or(&discussion);
    format!(
        "<li><a href=\"{}\">{}</a> <span class=\"meta\">{} points by {} | <a href=\"{}\">{} comments</a></span></li>",
        escape_html(link),
        escape_html(&story.title),
        story.score.unwrap_or(0),
        escape_html(story.by.as_deref().unwrap_or("[deleted]")),
        escape_html(&discussion),
        story.descendants.unwrap_or(0),
    )
}

fn render_indices(root: &Path, days: &[Day]) -> Result<()> {
    let mut calendar: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for day in days {
        let (year, month, date) = date_parts(day.date);
        calendar.entry(year).or_default().entry(month).or_default().push(date);
    }

    let years = calendar.keys().cloned().collect::<Vec<String>>();
    fs::write(root.join("index.html"), page("Archive", &[], &listing(&years)))?;
    for (year, months) in &calendar {
        let breadcrumbs = [("root", None, Some("../")), ("year", Some(year.as_str()), None)];
        let names = months.keys().cloned().collect::<Vec<String>>();
        fs::write(root.join(year).join("index.html"), page(year, &breadcrumbs, &listing(&names)))?;
        for (month, dates) in months {
            let breadcrumbs = [
                ("root", None, Some("../../")),
                ("year", Some(year.as_str()), Some("../")),
                ("month", Some(month.as_str()), None),
            ];
            fs::write(
                root.join(year).join(month).join("index.html"),
                page(&format!("{}-{}", year, month), &breadcrumbs, &listing(dates)),
            )?;
        }
    }
    Ok(())
}

fn date_parts(date: NaiveDate) -> (String, String, String) {
    (
        format!("{:04}", date.year()),
        format!("{:02}", date.month()),
        format!("{:02}", date.day()),
    )
}

fn listing(entries: &[String]) -> String {
    let items = entries
        .iter()
        .map(|e| format!("<li><a href=\"{0}/\">{0}</a></li>", escape_html(e)))
        .collect::<Vec<String>>()
        .join("\n");
    format!("<ul class=\"listing\">\n{}\n</ul>", items)
}

type Breadcrumb<'a> = (&'a str, Option<&'a str>, Option<&'a str>);

fn page(title: &str, breadcrumbs: &[Breadcrumb], body: &str) -> String {
    let nav = breadcrumbs
        .iter()
        .map(|(kind, label, href)| {
            let label = escape_html(label.unwrap_or("archive"));
            match href {
                Some(href) => format!("<a class=\"{}\" href=\"{}\">{}</a>", kind, href, label),
                None => format!("<span class=\"{}\">{}</span>", kind, label),
            }
        })
        .collect::<Vec<String>>()
        .join(" / ");
    format!(
        "<!DOCTYPE html>\n\
        <html lang=\"en\">\n\
        <head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n\
        <body>\n<nav>{}</nav>\n<h1>{}</h1>\n{}\n</body>\n\
        </html>\n",
        escape_html(title),
        nav,
        escape_html(title),
        body
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Item;

    fn story(day: &str, id: i64, title: &str) -> Story {
        Story {
            day: day.to_string(),
            id,
            title: title.to_string(),
            url: None,
            by: None,
            score: None,
            descendants: None,
        }
    }

    #[test]
    fn groups_consecutive_days() {
        let days = group_by_day(vec![
            story("2023-11-14", 1, "a"),
            story("2023-11-14", 2, "b"),
            story("2023-11-15", 3, "c"),
        ])
        .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2023, 11, 14).unwrap());
        assert_eq!(days[0].stories.len(), 2);
        assert_eq!(days[1].stories[0].id, 3);
        assert!(group_by_day(vec![]).unwrap().is_empty());
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Show HN" & 'more'</b>"#),
            "&lt;b&gt;&quot;Show HN&quot; &amp; &#x27;more&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn renders_story_without_url_as_discussion_link() {
        let html = render_story(&story("2023-11-14", 8863, "Ask HN: <tags>?"));
        assert!(html.contains("href=\"https://news.ycombinator.com/item?id=8863\""));
        assert!(html.contains("Ask HN: &lt;tags&gt;?"));
    }

    #[test]
    fn generates_date_partitioned_site() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("items.db");
        let database = database.to_str().unwrap();
        let mut repo = Repository::new(database).unwrap();
        let mut first = Item::story(1, "First & best");
        first.time = Some(1_700_000_000);
        let mut second = Item::story(2, "Second");
        second.time = Some(1_700_000_000 + 86_400);
        repo.save_items(&[first, second]).unwrap();

        let output = dir.path().join("site");
        fs::create_dir_all(output.join("stale")).unwrap();
        generate_site(database, &output, None).unwrap();

        let day = fs::read_to_string(output.join("2023/11/14/index.html")).unwrap();
        assert!(day.contains("First &amp; best"));
        assert!(day.contains("href=\"../../../\""));
        assert!(output.join("2023/11/15/index.html").exists());
        assert!(fs::read_to_string(output.join("index.html")).unwrap().contains("href=\"2023/\""));
        assert!(fs::read_to_string(output.join("2023/index.html")).unwrap().contains("href=\"11/\""));
        assert!(fs::read_to_string(output.join("2023/11/index.html")).unwrap().contains("href=\"15/\""));
        assert!(!output.join("stale").exists());

        generate_site(database, &output, Some(1)).unwrap();
        assert!(output.join("2023/11/14/index.html").exists());
        assert!(!output.join("2023/11/15").exists());
    }
}
