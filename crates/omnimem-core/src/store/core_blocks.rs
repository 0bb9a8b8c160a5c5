//! Core blocks - persistent top-of-context directives.
//!
//! A core block is identified by `(project_id, session_id, name)` and backed
//! by a long-layer memory so it survives sync and reindex like everything
//! else. Retrieval injects blocks ahead of ranked items.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::memory::{Kind, Layer, Scope, Source};

use super::index::{MemoryStore, WriteInput};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct CoreBlockInput {
    pub name: String,
    pub content: String,
    pub project_id: String,
    pub session_id: String,
    pub priority: i64,
    pub topic: Option<String>,
    pub source: Source,
}

impl Default for CoreBlockInput {
    fn default() -> Self {
        Self {
            name: String::new(),
            content: String::new(),
            project_id: String::new(),
            session_id: String::new(),
            priority: 0,
            topic: None,
            source: Source::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreBlock {
    pub project_id: String,
    pub session_id: String,
    pub name: String,
    pub content: String,
    pub priority: i64,
    pub topic: Option<String>,
    pub memory_id: String,
    pub updated_at: String,
}

impl CoreBlock {
    /// Ordered content lines for context assembly.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.lines()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreBlockOutcome {
    pub ok: bool,
    /// `created` or `updated`
    pub action: String,
    pub memory_id: String,
}

// ============================================================================
// STORE EXTENSION
// ============================================================================

impl MemoryStore {
    /// Create or refresh a core block. The backing memory id is stable across
    /// updates for a given `(project, session, name)`.
    pub fn upsert_core_block(&self, input: CoreBlockInput) -> Result<CoreBlockOutcome> {
        if input.name.trim().is_empty() {
            return Err(crate::error::MemoryError::InvalidArgument(
                "core block name is empty".to_string(),
            ));
        }
        let existing = self.get_core_block(&input.name, &input.project_id, &input.session_id)?;

        let (action, memory_id) = match existing {
            Some(block) => {
                self.update_memory_content(&block.memory_id, &input.content)?;
                ("updated", block.memory_id)
            }
            None => {
                let outcome = self.write_memory(WriteInput {
                    layer: Layer::Long,
                    kind: Kind::Note,
                    summary: format!("Core block: {}", input.name),
                    body: input.content.clone(),
                    tags: vec!["core-block".to_string(), format!("block:{}", input.name)],
                    source: input.source.clone(),
                    scope: Scope {
                        project_id: input.project_id.clone(),
                        workspace: String::new(),
                    },
                    ..WriteInput::default()
                })?;
                ("created", outcome.envelope.id)
            }
        };

        let conn = self.write()?;
        conn.execute(
            "INSERT OR REPLACE INTO core_blocks(
               project_id, session_id, name, content, priority, topic, memory_id, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                input.project_id,
                input.session_id,
                input.name,
                input.content,
                input.priority,
                input.topic,
                memory_id,
                crate::memory::utc_now_ts(),
            ],
        )?;
        drop(conn);

        self.record_system_event(
            crate::memory::EventType::Update,
            json!({"action": "core_block_upsert", "name": input.name, "result": action}),
        )?;

        Ok(CoreBlockOutcome {
            ok: true,
            action: action.to_string(),
            memory_id,
        })
    }

    pub fn get_core_block(
        &self,
        name: &str,
        project_id: &str,
        session_id: &str,
    ) -> Result<Option<CoreBlock>> {
        let conn = self.read()?;
        conn.query_row(
            "SELECT project_id, session_id, name, content, priority, topic, memory_id, updated_at
             FROM core_blocks
             WHERE name = ?1 AND project_id = ?2 AND session_id = ?3",
            params![name, project_id, session_id],
            core_block_from_row,
        )
        .optional()
        .map_err(crate::error::MemoryError::from)
    }

    /// Blocks for a scope, priority order.
    pub fn list_core_blocks(
        &self,
        project_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<CoreBlock>> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, session_id, name, content, priority, topic, memory_id, updated_at
             FROM core_blocks
             WHERE (project_id = ?1 OR ?1 = '') AND (session_id = ?2 OR ?2 = '')
             ORDER BY priority DESC, updated_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![project_id, session_id, limit as i64],
            core_block_from_row,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(crate::error::MemoryError::from)
    }
}

fn core_block_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoreBlock> {
    Ok(CoreBlock {
        project_id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        priority: row.get(4)?,
        topic: row.get(5)?,
        memory_id: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_store;

    fn block(name: &str, content: &str) -> CoreBlockInput {
        CoreBlockInput {
            name: name.to_string(),
            content: content.to_string(),
            project_id: "OM".to_string(),
            session_id: "s1".to_string(),
            ..CoreBlockInput::default()
        }
    }

    #[test]
    fn test_upsert_get_list() {
        let (store, _dir) = open_test_store();
        let c1 = store
            .upsert_core_block(block("persona", "Respond in concise technical style."))
            .unwrap();
        assert_eq!(c1.action, "created");

        let c2 = store
            .upsert_core_block(block(
                "persona",
                "Respond in concise technical style. Prefer bullet points.",
            ))
            .unwrap();
        assert_eq!(c2.action, "updated");
        assert_eq!(c1.memory_id, c2.memory_id);

        let got = store.get_core_block("persona", "OM", "s1").unwrap().unwrap();
        assert!(got.content.contains("Prefer bullet points"));

        let listed = store.list_core_blocks("OM", "s1", 16).unwrap();
        assert!(listed.iter().any(|b| b.name == "persona"));
    }

    #[test]
    fn test_priority_orders_listing() {
        let (store, _dir) = open_test_store();
        let mut low = block("later", "low priority");
        low.priority = 1;
        let mut high = block("first", "high priority");
        high.priority = 9;
        store.upsert_core_block(low).unwrap();
        store.upsert_core_block(high).unwrap();
        let listed = store.list_core_blocks("OM", "s1", 16).unwrap();
        assert_eq!(listed[0].name, "first");
    }

    #[test]
    fn test_backing_memory_keeps_hash_invariant() {
        let (store, _dir) = open_test_store();
        let c = store.upsert_core_block(block("constraints", "v1")).unwrap();
        store
            .upsert_core_block(block("constraints", "v2 with more detail"))
            .unwrap();
        let record = store.get_memory(&c.memory_id).unwrap().unwrap();
        assert!(record.body_text.contains("v2 with more detail"));
        assert!(store.verify().unwrap().ok);
    }
}
