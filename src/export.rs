use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::model::Highlight;

/// A plain-text export, ready to be offered as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub contents: String,
}

impl ExportFile {
    pub fn save(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        fs::write(&path, &self.contents)?;
        Ok(path)
    }
}

/// Renders highlights as a numbered list, in the order given. Dates are shown in the
/// time zone of `exported_at`.
pub fn render<'a, Tz>(highlights: impl IntoIterator<Item = &'a Highlight>, exported_at: &DateTime<Tz>) -> ExportFile
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let tz = exported_at.timezone();
    let mut contents = format!("Highlights exported on {}\n\n", exported_at.format("%m/%d/%Y"));

    for (n, highlight) in highlights.into_iter().enumerate() {
        let created = highlight.created_at.with_timezone(&tz);
        contents.push_str(&format!(
            "{}. {}\n   Date: {}, {}\n\n",
            n + 1,
            highlight.text,
            created.format("%m/%d/%Y"),
            created.format("%-I:%M:%S %p"),
        ));
    }

    ExportFile {
        filename: format!("highlights-{}.txt", exported_at.format("%Y-%m-%d")),
        contents,
    }
}
