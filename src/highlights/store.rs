use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::Connection;
use uuid::Uuid;

use crate::model::{Color, Highlight, NewHighlight, now_millis};

pub struct HighlightStore<'a> {
    conn: &'a Connection,
}

impl<'a> HighlightStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, input: NewHighlight) -> Result<Highlight> {
        let id = Uuid::new_v4().simple().to_string();
        let created_at = now_millis();

        let query = r#"
            INSERT INTO highlights (id, user_id, url, text, color, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, url, text, color, created_at
        "#;

        let mut rows = self
            .conn
            .query(
                query,
                libsql::params![
                    id,
                    input.user_id,
                    input.url,
                    input.text,
                    input.color.as_str(),
                    format_timestamp(&created_at)
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(self.row_to_highlight(&row)?)
        } else {
            anyhow::bail!("Failed to create highlight")
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Highlight>> {
        let query = r#"
            SELECT id, user_id, url, text, color, created_at
            FROM highlights WHERE id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_highlight(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Highlights for one `(user_id, url)` pair, newest first.
    pub async fn list(&self, user_id: &str, url: &str) -> Result<Vec<Highlight>> {
        let query = r#"
            SELECT id, user_id, url, text, color, created_at
            FROM highlights
            WHERE user_id = ? AND url = ?
            ORDER BY created_at DESC, rowid DESC
        "#;

        let mut rows = self.conn.query(query, libsql::params![user_id, url]).await?;
        let mut highlights = Vec::new();

        while let Some(row) = rows.next().await? {
            highlights.push(self.row_to_highlight(&row)?);
        }

        Ok(highlights)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .conn
            .execute("DELETE FROM highlights WHERE id = ?", libsql::params![id])
            .await?;
        Ok(result > 0)
    }

    fn row_to_highlight(&self, row: &libsql::Row) -> Result<Highlight> {
        let color_str: String = row.get(4)?;
        let color: Color = color_str
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid highlight color: {}", color_str))?;
        let created_str: String = row.get(5)?;
        let created_at = DateTime::parse_from_rfc3339(&created_str)
            .map_err(|e| anyhow::anyhow!("Invalid created_at {}: {}", created_str, e))?
            .with_timezone(&Utc);

        Ok(Highlight {
            id: row.get(0)?,
            user_id: row.get(1)?,
            url: row.get(2)?,
            text: row.get(3)?,
            color,
            created_at,
        })
    }
}

// Fixed-width so that text ordering in SQL matches chronological ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
