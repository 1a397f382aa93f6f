//! Page repository. Pages are written once during transcription; the
//! validator counts them in SQL.

use rusqlite::params;

use super::{Database, DatabaseError};
use crate::model::Page;

/// Builds a page with a fresh identifier.
pub fn new_page(job_id: &str, page_number: u32, text: &str) -> Page {
    Page {
        id: uuid::Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        page_number,
        text: text.to_string(),
    }
}

/// Inserts a new page row.
pub fn insert(db: &Database, page: &Page) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pages (id, job_id, page_number, text) VALUES (?1, ?2, ?3, ?4)",
            params![page.id, page.job_id, page.page_number, page.text],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;
    use crate::model::{Job, JobStatus};
    use chrono::Utc;

    fn db_with_job(id: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        job_repo::insert(
            &db,
            &Job {
                id: id.to_string(),
                file_name: "scan.pdf".to_string(),
                status: JobStatus::Transcribing,
                is_chunked: false,
                consolidated_content: None,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
        db
    }

    fn page_count(db: &Database, job_id: &str) -> u64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE job_id = ?1",
                params![job_id],
                |r| r.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn test_insert_feeds_job_counts() {
        let db = db_with_job("j1");
        insert(&db, &new_page("j1", 2, "second")).unwrap();
        insert(&db, &new_page("j1", 1, "first")).unwrap();

        let counts = job_repo::find_with_counts(&db, "j1").unwrap().unwrap();
        assert_eq!(counts.page_count, 2);
        assert!(insert(&db, &new_page("j1", 1, "again")).is_err());
    }

    #[test]
    fn test_page_requires_existing_job() {
        let db = Database::open_in_memory().unwrap();
        assert!(insert(&db, &new_page("ghost", 1, "x")).is_err());
    }

    #[test]
    fn test_pages_cascade_with_job() {
        let db = db_with_job("j2");
        insert(&db, &new_page("j2", 1, "x")).unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM jobs WHERE id = 'j2'", [])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(page_count(&db, "j2"), 0);
    }
}
