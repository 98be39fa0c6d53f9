//! Entity backfill sweep
//!
//! Walks information units the knowledge-graph step has not visited, runs
//! an entity/relation extraction prompt over each, and writes the results
//! through the entity store. Every visited unit gets `entity_processed`
//! set — including units yielding zero entities — so the sweep always
//! converges.

use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use crate::models::{ExtractedEntity, ExtractedRelation, InformationUnit};
use crate::storage::{EntityStore, InformationStore};
use std::sync::Arc;

const AGENT_NAME: &str = "EntityBackfill";

const SYSTEM_PROMPT: &str = r#"You are an entity-relation extraction specialist. Given a text (title plus content), extract the entities it involves and the relations between them.

## Extraction targets

1. Entities: companies (COMPANY), people (PERSON), products (PRODUCT), organizations (ORG), concepts (CONCEPT), locations (LOCATION), events (EVENT). Include aliases (abbreviations, alternate names) and the entity's role (protagonist/supporting/mentioned). Note a state change when the text asserts one.

2. Relations between the entities: competitor, partner, supplier, customer, investor, ceo_of, founder_of, parent_of, subsidiary_of, peer, employee_of. Quote the supporting text.

## Output (JSON)
```json
{
  "entities_mentioned": [
    {
      "name": "canonical name",
      "aliases": ["alias"],
      "type": "COMPANY",
      "role": "protagonist",
      "state_change": {"dimension": "TECH", "delta": "released a new product"}
    }
  ],
  "entity_relations": [
    {"source": "A", "target": "B", "relation": "competitor", "evidence": "quoted text"}
  ]
}
```

Return empty lists when the text has no clear entities or relations. The JSON must be valid."#;

pub struct EntityBackfill {
    llm: Arc<LlmClient>,
    info_store: InformationStore,
    entity_store: EntityStore,
}

impl EntityBackfill {
    pub fn new(
        llm: Arc<LlmClient>,
        info_store: InformationStore,
        entity_store: EntityStore,
    ) -> Self {
        Self {
            llm,
            info_store,
            entity_store,
        }
    }

    /// Process up to `limit` pending units. Returns how many were handled
    /// successfully.
    pub async fn run(&self, limit: usize) -> crate::Result<usize> {
        let pending = self.info_store.get_unprocessed(limit)?;
        tracing::info!(count = pending.len(), "Backfill started");
        if pending.is_empty() {
            return Ok(0);
        }

        let mut processed = 0;
        for unit in pending {
            match self.process_unit(&unit).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    tracing::error!(unit_id = %unit.id, error = %e, "Backfill unit failed");
                }
            }
        }
        tracing::info!(processed, "Backfill completed");
        Ok(processed)
    }

    async fn process_unit(&self, unit: &InformationUnit) -> crate::Result<()> {
        // Units that carry payloads from extraction skip the model call
        let (entities, relations) = if !unit.extracted_entities.is_empty()
            || !unit.extracted_relations.is_empty()
        {
            (unit.extracted_entities.clone(), unit.extracted_relations.clone())
        } else {
            self.extract(unit).await?
        };

        if entities.is_empty() {
            tracing::debug!(unit_id = %unit.id, "No entities found");
        } else {
            let event_time = unit.report_time;
            self.entity_store
                .process_extracted(&unit.id, &entities, &relations, event_time)?;
        }

        // Unconditional: otherwise the next sweep selects this unit again
        self.info_store.mark_entity_processed(&unit.id)?;
        Ok(())
    }

    async fn extract(
        &self,
        unit: &InformationUnit,
    ) -> crate::Result<(Vec<ExtractedEntity>, Vec<ExtractedRelation>)> {
        let prompt = format!(
            "Title: {}\nSummary: {}\nContent:\n{}",
            unit.title,
            unit.summary,
            unit.content.chars().take(2000).collect::<String>()
        );
        let messages = build_messages(SYSTEM_PROMPT, &prompt, None);

        let llm = self.llm.clone();
        let (parsed, _usage) = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, None, None, None).await
        })
        .await?;

        let Some(value) = parsed else {
            return Ok((Vec::new(), Vec::new()));
        };

        let entities = value["entities_mentioned"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|e| serde_json::from_value::<ExtractedEntity>(e.clone()).ok())
                    .filter(|e| !e.name.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let relations = value["entity_relations"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|r| serde_json::from_value::<ExtractedRelation>(r.clone()).ok())
                    .filter(|r| !r.source.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok((entities, relations))
    }
}
