//! Template catalog and instantiation.
//!
//! Templates are id-less blueprints (`agentloom_types::template`). The
//! instantiator mints fresh node ids, rewrites index-pair references into
//! id references, rebuilds each node's `next_nodes` from the template
//! connections, and registers the result through the registry -- so two
//! instantiations of the same template never share a node id.

use std::collections::HashMap;

use agentloom_types::template::{TemplateNode, WorkflowTemplate};
use agentloom_types::workflow::{
    NodeConfig, TriggerKind, Workflow, WorkflowConnection, WorkflowNode,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::store::WorkflowStore;

use super::registry::{CreateWorkflow, RegistryError, WorkflowRegistry};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: '{0}'")]
    TemplateNotFound(String),

    /// A template references a node index outside its node list.
    #[error("template '{template}' references node index {index} out of range")]
    InvalidReference { template: String, index: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// TemplateCatalog
// ---------------------------------------------------------------------------

/// A static catalog of workflow templates keyed by slug.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, WorkflowTemplate>,
}

impl TemplateCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog shipped with the product.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(daily_digest_template());
        catalog.register(lead_qualification_template());
        catalog
    }

    /// Register a template, replacing any previous one with the same id.
    pub fn register(&mut self, template: WorkflowTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Look up a template by id.
    pub fn get(&self, template_id: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(template_id)
    }

    /// All registered templates.
    pub fn list(&self) -> Vec<&WorkflowTemplate> {
        self.templates.values().collect()
    }

    /// Materialize a template into a concrete workflow.
    pub async fn create_from_template<S: WorkflowStore>(
        &self,
        registry: &WorkflowRegistry<S>,
        template_id: &str,
        name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Result<Workflow, TemplateError> {
        let template = self
            .get(template_id)
            .ok_or_else(|| TemplateError::TemplateNotFound(template_id.to_string()))?;

        let ids: Vec<Uuid> = template.nodes.iter().map(|_| Uuid::now_v7()).collect();
        let resolve = |index: usize| {
            ids.get(index)
                .copied()
                .ok_or(TemplateError::InvalidReference {
                    template: template.id.clone(),
                    index,
                })
        };

        let mut nodes: Vec<WorkflowNode> = template
            .nodes
            .iter()
            .zip(&ids)
            .map(|(blueprint, id)| {
                let config = blueprint
                    .config
                    .clone()
                    .map_refs(&mut |index| resolve(index))?;
                Ok(WorkflowNode {
                    id: *id,
                    node_type: config.node_type(),
                    name: blueprint.name.clone(),
                    config,
                    position: blueprint.position,
                    next_nodes: vec![],
                })
            })
            .collect::<Result<_, TemplateError>>()?;

        let mut connections: Vec<WorkflowConnection> = vec![];
        for connection in &template.connections {
            let from = resolve(connection.from_index)?;
            let to = resolve(connection.to_index)?;
            let source = &mut nodes[connection.from_index];
            if !source.next_nodes.contains(&to) {
                source.next_nodes.push(to);
            }
            connections.push(WorkflowConnection {
                id: Uuid::now_v7(),
                from_node: from,
                to_node: to,
                label: connection.label.clone(),
            });
        }

        let workflow = registry
            .create(CreateWorkflow {
                name: name.into(),
                description: template.description.clone(),
                created_by: created_by.into(),
                nodes,
                connections,
                variables: template.variables.clone(),
                tags: template.tags.clone(),
                category: template.category.clone(),
                settings: Default::default(),
            })
            .await?;

        tracing::info!(
            template = template.id.as_str(),
            workflow_id = %workflow.id,
            "workflow instantiated from template"
        );
        Ok(workflow)
    }
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

/// Schedule-triggered research digest: search, summarize, done.
fn daily_digest_template() -> WorkflowTemplate {
    WorkflowTemplate {
        id: "daily-digest".to_string(),
        name: "Daily Digest".to_string(),
        description: Some("Gather news on a topic and produce a summary".to_string()),
        category: Some("research".to_string()),
        tags: vec!["news".to_string(), "digest".to_string()],
        variables: vec![],
        nodes: vec![
            TemplateNode {
                name: "Every Morning".to_string(),
                config: NodeConfig::Trigger {
                    trigger_type: TriggerKind::Schedule,
                    filter: None,
                },
                position: None,
            },
            TemplateNode {
                name: "Gather News".to_string(),
                config: NodeConfig::Action {
                    action_type: "news_search".to_string(),
                    parameters: json!({ "topic": "{{ topic }}" }),
                    output_variable: Some("articles".to_string()),
                },
                position: None,
            },
            TemplateNode {
                name: "Summarize".to_string(),
                config: NodeConfig::Action {
                    action_type: "summarize".to_string(),
                    parameters: json!({ "source": "articles" }),
                    output_variable: Some("digest".to_string()),
                },
                position: None,
            },
            TemplateNode {
                name: "Done".to_string(),
                config: NodeConfig::End {},
                position: None,
            },
        ],
        connections: vec![
            template_edge(0, 1),
            template_edge(1, 2),
            template_edge(2, 3),
        ],
        required_tools: vec!["news_search".to_string(), "summarize".to_string()],
        optional_tools: vec![],
    }
}

/// Webhook-triggered lead scoring with a size-based branch.
fn lead_qualification_template() -> WorkflowTemplate {
    use agentloom_types::workflow::{ConditionOperator, ConditionRule, Predicate};

    WorkflowTemplate {
        id: "lead-qualification".to_string(),
        name: "Lead Qualification".to_string(),
        description: Some("Enrich inbound leads and route large accounts to sales".to_string()),
        category: Some("sales".to_string()),
        tags: vec!["crm".to_string()],
        variables: vec![],
        nodes: vec![
            TemplateNode {
                name: "New Lead".to_string(),
                config: NodeConfig::Trigger {
                    trigger_type: TriggerKind::Webhook,
                    filter: None,
                },
                position: None,
            },
            TemplateNode {
                name: "Enrich Company".to_string(),
                config: NodeConfig::Action {
                    action_type: "company_search".to_string(),
                    parameters: json!({ "query": "{{ lead.company }}" }),
                    output_variable: Some("company".to_string()),
                },
                position: None,
            },
            TemplateNode {
                name: "Route by Size".to_string(),
                config: NodeConfig::Condition {
                    conditions: vec![ConditionRule {
                        id: "enterprise".to_string(),
                        predicate: Predicate {
                            field: "company.size".to_string(),
                            operator: ConditionOperator::Gte,
                            value: json!(500),
                        },
                        next_node: Some(3),
                    }],
                    default_node: Some(4),
                },
                position: None,
            },
            TemplateNode {
                name: "Notify Sales".to_string(),
                config: NodeConfig::Action {
                    action_type: "notification".to_string(),
                    parameters: json!({ "channel": "sales" }),
                    output_variable: None,
                },
                position: None,
            },
            TemplateNode {
                name: "Done".to_string(),
                config: NodeConfig::End {},
                position: None,
            },
        ],
        connections: vec![
            template_edge(0, 1),
            template_edge(1, 2),
            template_edge(3, 4),
        ],
        required_tools: vec!["company_search".to_string(), "notification".to_string()],
        optional_tools: vec!["web_search".to_string()],
    }
}

fn template_edge(from_index: usize, to_index: usize) -> agentloom_types::template::TemplateConnection {
    agentloom_types::template::TemplateConnection {
        from_index,
        to_index,
        label: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
