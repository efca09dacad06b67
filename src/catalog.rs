use crate::store::{new_id, now_ms};
use rusqlite::{params, Connection, OptionalExtension};

pub struct CatalogSeed {
    pub name: &'static str,
    pub domain: &'static str,
    pub subcategory: &'static str,
    pub default_exp: i64,
    pub difficulty: i64,
    pub record_type: &'static str,
    pub description: &'static str,
}

/// Baseline quick-check items every school starts with. These render in the
/// client checklist; they are never distributed as records by a publish.
pub fn default_entries() -> Vec<CatalogSeed> {
    vec![
        CatalogSeed {
            name: "Word dictation",
            domain: "progress",
            subcategory: "chinese checks",
            default_exp: 8,
            difficulty: 2,
            record_type: "qc",
            description: "Dictation of this lesson's new words",
        },
        CatalogSeed {
            name: "Text recitation",
            domain: "progress",
            subcategory: "chinese checks",
            default_exp: 10,
            difficulty: 3,
            record_type: "qc",
            description: "Fluent recitation of the lesson passage",
        },
        CatalogSeed {
            name: "Poem from memory",
            domain: "progress",
            subcategory: "chinese checks",
            default_exp: 12,
            difficulty: 3,
            record_type: "qc",
            description: "Classical poem written from memory",
        },
        CatalogSeed {
            name: "Mental math drill",
            domain: "progress",
            subcategory: "math checks",
            default_exp: 8,
            difficulty: 2,
            record_type: "qc",
            description: "Ten-minute mental arithmetic drill",
        },
        CatalogSeed {
            name: "Column arithmetic",
            domain: "progress",
            subcategory: "math checks",
            default_exp: 12,
            difficulty: 3,
            record_type: "qc",
            description: "Multi-digit column calculation",
        },
        CatalogSeed {
            name: "Vocabulary spelling",
            domain: "progress",
            subcategory: "english checks",
            default_exp: 8,
            difficulty: 2,
            record_type: "qc",
            description: "Spelling of this unit's vocabulary",
        },
        CatalogSeed {
            name: "Listening comprehension",
            domain: "progress",
            subcategory: "english checks",
            default_exp: 8,
            difficulty: 2,
            record_type: "qc",
            description: "Short listening comprehension pass",
        },
    ]
}

/// Seed the shared defaults once, the first time a school lists an empty
/// catalog.
pub fn ensure_seeded(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_library WHERE active = 1",
        [],
        |r| r.get(0),
    )?;
    if count > 0 {
        return Ok(0);
    }
    let ts = now_ms();
    let mut stmt = conn.prepare(
        "INSERT INTO task_library(
            id, school_id, name, domain, subcategory, category, description,
            default_exp, type, difficulty, active, updated_at
         ) VALUES(?, 'default', ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )?;
    let entries = default_entries();
    for e in &entries {
        stmt.execute(params![
            new_id(),
            e.name,
            e.domain,
            e.subcategory,
            e.subcategory, // kept in sync for older readers
            e.description,
            e.default_exp,
            e.record_type,
            e.difficulty,
            ts
        ])?;
    }
    Ok(entries.len())
}

/// Catalog default-experience lookup. School-scoped entries shadow the
/// shared defaults; a miss returns None and the caller falls back to its own
/// value.
pub fn default_exp_for(
    conn: &Connection,
    school_id: &str,
    subcategory: &str,
    name: &str,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT default_exp FROM task_library
         WHERE active = 1
           AND name = ?
           AND (subcategory = ? OR ? = '')
           AND school_id IN (?, 'default')
         ORDER BY CASE school_id WHEN ? THEN 0 ELSE 1 END
         LIMIT 1",
        params![name, subcategory, subcategory, school_id, school_id],
        |r| r.get(0),
    )
    .optional()
}
