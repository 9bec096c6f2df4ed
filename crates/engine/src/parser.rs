//! Workflow source parsing and structural validation.
//!
//! Parsing happens in two stages. The YAML text is first deserialized into the
//! authoring schema from `stepline_types` (either a single workflow or a
//! `workflows:` bundle). The selected document is then validated and compiled into a
//! [`Workflow`] with a resolved jump table.
//!
//! Validation is structural only: ids, types, jump targets and the back-reference
//! rule. Property contents are checked by handlers when the node runs.

use std::collections::HashMap;

use indexmap::IndexMap;
use stepline_types::{
    END_TARGET, NodeDefinition, NodeType, WorkflowBundleDocument, WorkflowDocument, workflow::properties::property_text,
};
use tracing::debug;

use crate::{
    error::ParseError,
    model::{Jumps, Target, Workflow, WorkflowNode},
};

/// Name given to a single-workflow document without a `name`.
pub const DEFAULT_WORKFLOW_NAME: &str = "default";

/// Parses workflow YAML and selects one workflow.
///
/// `name` selects an entry of a multi-workflow document. For a single-workflow
/// document it must match the document name when given.
pub fn parse_workflow_str(source: &str, name: Option<&str>) -> Result<Workflow, ParseError> {
    let bundle = parse_bundle(source)?;
    let (workflow_name, document) = select_document(bundle, name)?;
    parse_document(document, &workflow_name)
}

/// Deserializes workflow YAML into named authoring documents.
///
/// A root mapping with a `workflows` key is only ever read as a multi-workflow
/// document, so its deserialization errors surface as they are.
pub fn parse_bundle(source: &str) -> Result<WorkflowBundleDocument, ParseError> {
    let root: serde_yaml::Value = serde_yaml::from_str(source).map_err(|error| ParseError::Malformed(error.to_string()))?;
    if root.get("workflows").is_some() {
        return serde_yaml::from_value(root).map_err(|error| ParseError::Malformed(error.to_string()));
    }

    let document: WorkflowDocument = serde_yaml::from_value(root).map_err(|error| ParseError::Malformed(error.to_string()))?;
    let workflow_name = document
        .name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_WORKFLOW_NAME.to_string());

    let mut workflows = IndexMap::new();
    workflows.insert(workflow_name, document);
    Ok(WorkflowBundleDocument { workflows })
}

fn select_document(mut bundle: WorkflowBundleDocument, name: Option<&str>) -> Result<(String, WorkflowDocument), ParseError> {
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(requested) => bundle
            .workflows
            .shift_remove_entry(requested)
            .ok_or_else(|| ParseError::UnknownWorkflow(requested.to_string())),
        None if bundle.workflows.len() == 1 => bundle.workflows.pop().ok_or(ParseError::Empty),
        None if bundle.workflows.is_empty() => Err(ParseError::Empty),
        None => Err(ParseError::AmbiguousWorkflow(bundle.workflows.keys().cloned().collect())),
    }
}

/// Validates an authoring document and compiles its jump table.
pub fn parse_document(document: WorkflowDocument, workflow_name: &str) -> Result<Workflow, ParseError> {
    if document.nodes.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut declared: Vec<(String, NodeType, &NodeDefinition)> = Vec::with_capacity(document.nodes.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(document.nodes.len());

    for (position, definition) in document.nodes.iter().enumerate() {
        let node_id = node_id_for(definition, position);
        let node_type = definition
            .node_type
            .parse::<NodeType>()
            .map_err(|unknown| ParseError::UnknownNodeType {
                node_id: node_id.clone(),
                node_type: unknown.0,
            })?;
        if positions.insert(node_id.clone(), position).is_some() {
            return Err(ParseError::DuplicateNodeId(node_id));
        }
        declared.push((node_id, node_type, definition));
    }

    let types: Vec<NodeType> = declared.iter().map(|(_, node_type, _)| *node_type).collect();
    let resolver = TargetResolver {
        positions: &positions,
        types: &types,
    };

    let mut nodes = Vec::with_capacity(declared.len());
    for (position, (node_id, node_type, definition)) in declared.iter().enumerate() {
        let jumps = resolver.jumps_for(node_id, *node_type, definition, position)?;
        let properties = definition
            .properties
            .iter()
            .filter_map(|(key, value)| property_text(value).map(|text| (key.clone(), text)))
            .collect();
        nodes.push(WorkflowNode {
            id: node_id.clone(),
            node_type: *node_type,
            properties,
            jumps,
        });
    }

    let start = match document.start_node.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(start_id) => *positions
            .get(start_id)
            .ok_or_else(|| ParseError::UnknownStartNode(start_id.to_string()))?,
        None => 0,
    };

    debug!(workflow = %workflow_name, nodes = nodes.len(), start, "parsed workflow");
    Ok(Workflow::from_parts(
        workflow_name.to_string(),
        document.description.clone(),
        nodes,
        start,
    ))
}

fn node_id_for(definition: &NodeDefinition, position: usize) -> String {
    definition
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("node-{}", position + 1))
}

struct TargetResolver<'a> {
    positions: &'a HashMap<String, usize>,
    types: &'a [NodeType],
}

impl TargetResolver<'_> {
    fn jumps_for(&self, node_id: &str, node_type: NodeType, definition: &NodeDefinition, position: usize) -> Result<Jumps, ParseError> {
        let sequential = if position + 1 < self.types.len() {
            Target::Node(position + 1)
        } else {
            Target::PastEnd
        };

        if node_type.is_branching() {
            if definition.next.is_some() {
                return Err(unexpected_branch(node_id, node_type, "next"));
            }
            let true_target = definition
                .true_next
                .as_deref()
                .ok_or_else(|| ParseError::MissingBranch {
                    node_id: node_id.to_string(),
                    node_type: node_type.to_string(),
                    field: "trueNext",
                })?;
            let true_next = self.resolve(node_id, position, "trueNext", true_target)?;
            let false_next = match definition.false_next.as_deref() {
                Some(false_target) => self.resolve(node_id, position, "falseNext", false_target)?,
                None => sequential,
            };
            return Ok(Jumps {
                next: sequential,
                true_next: Some(true_next),
                false_next: Some(false_next),
            });
        }

        if definition.true_next.is_some() {
            return Err(unexpected_branch(node_id, node_type, "trueNext"));
        }
        if definition.false_next.is_some() {
            return Err(unexpected_branch(node_id, node_type, "falseNext"));
        }

        let next = match definition.next.as_deref() {
            Some(target) => self.resolve(node_id, position, "next", target)?,
            None => sequential,
        };
        Ok(Jumps {
            next,
            true_next: None,
            false_next: None,
        })
    }

    /// Resolves one explicit target. A declared node id takes precedence over `end`.
    fn resolve(&self, node_id: &str, position: usize, field: &'static str, target: &str) -> Result<Target, ParseError> {
        let target = target.trim();
        let Some(&target_position) = self.positions.get(target) else {
            if target == END_TARGET {
                return Ok(Target::End);
            }
            return Err(ParseError::UndeclaredTarget {
                node_id: node_id.to_string(),
                field,
                target: target.to_string(),
            });
        };

        let target_type = self.types[target_position];
        if target_position <= position && target_type != NodeType::While {
            return Err(ParseError::IllegalBackReference {
                node_id: node_id.to_string(),
                target: target.to_string(),
                target_type: target_type.to_string(),
            });
        }
        Ok(Target::Node(target_position))
    }
}

fn unexpected_branch(node_id: &str, node_type: NodeType, field: &'static str) -> ParseError {
    ParseError::UnexpectedBranch {
        node_id: node_id.to_string(),
        node_type: node_type.to_string(),
        field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EdgeKind;

    const COUNT_TO_THREE: &str = r#"
name: count-to-three
nodes:
  - id: init
    type: variable
    name: index
    value: 0
  - id: loop
    type: while
    condition: "{{index}} < 3"
    trueNext: inc
    falseNext: done
  - id: inc
    type: set
    name: index
    value: "{{index}} + 1"
    next: loop
  - id: done
    type: dialog
    message: "finished at {{index}}"
"#;

    #[test]
    fn builds_jump_table() {
        let workflow = parse_workflow_str(COUNT_TO_THREE, None).expect("parse");

        assert_eq!(workflow.name, "count-to-three");
        assert_eq!(workflow.order().collect::<Vec<_>>(), vec!["init", "loop", "inc", "done"]);
        assert_eq!(workflow.start_index(), 0);

        let init = workflow.node_by_id("init").expect("init");
        assert_eq!(init.jumps.next, Target::Node(1));
        assert_eq!(init.property("value"), Some("0"));

        let header = workflow.node_by_id("loop").expect("loop");
        assert_eq!(header.jumps.branch(true), Target::Node(2));
        assert_eq!(header.jumps.branch(false), Target::Node(3));

        assert_eq!(workflow.node_by_id("inc").expect("inc").jumps.next, Target::Node(1));
        assert_eq!(workflow.node_by_id("done").expect("done").jumps.next, Target::PastEnd);
    }

    #[test]
    fn derives_edges_from_jumps() {
        let workflow = parse_workflow_str(COUNT_TO_THREE, None).expect("parse");
        let edges = workflow.edges();

        assert_eq!(edges.len(), 4);
        assert!(edges.iter().any(|edge| edge.from == "inc" && edge.to == "loop" && edge.kind == EdgeKind::Next));
        assert!(edges.iter().any(|edge| edge.from == "loop" && edge.to == "done" && edge.kind == EdgeKind::False));
    }

    #[test]
    fn back_reference_to_non_while_is_rejected() {
        let source = r#"
nodes:
  - id: a
    type: variable
    name: x
    value: "1"
  - id: b
    type: set
    name: x
    value: "{{x}} + 1"
    next: a
"#;
        let error = parse_workflow_str(source, None).expect_err("back reference");
        assert!(matches!(error, ParseError::IllegalBackReference { ref target, .. } if target == "a"));
    }

    #[test]
    fn self_reference_counts_as_back_reference() {
        let source = r#"
nodes:
  - id: a
    type: sleep
    duration: 1
    next: a
"#;
        assert!(matches!(
            parse_workflow_str(source, None),
            Err(ParseError::IllegalBackReference { .. })
        ));
    }

    #[test]
    fn false_next_defaults_to_sequential_successor() {
        let source = r#"
nodes:
  - id: check
    type: if
    condition: "a == a"
    trueNext: matched
  - id: fallback
    type: variable
    name: r
    value: "false"
  - id: matched
    type: variable
    name: r
    value: "true"
"#;
        let workflow = parse_workflow_str(source, None).expect("parse");
        let check = workflow.node_by_id("check").expect("check");
        assert_eq!(check.jumps.branch(true), Target::Node(2));
        assert_eq!(check.jumps.branch(false), Target::Node(1));
    }

    #[test]
    fn structural_errors() {
        let duplicate = "nodes:\n  - {id: a, type: sleep}\n  - {id: a, type: sleep}\n";
        assert_eq!(parse_workflow_str(duplicate, None), Err(ParseError::DuplicateNodeId("a".into())));

        let undeclared = "nodes:\n  - {id: a, type: sleep, next: ghost}\n";
        assert!(matches!(
            parse_workflow_str(undeclared, None),
            Err(ParseError::UndeclaredTarget { field: "next", .. })
        ));

        let unknown_type = "nodes:\n  - {id: a, type: goto}\n";
        assert!(matches!(
            parse_workflow_str(unknown_type, None),
            Err(ParseError::UnknownNodeType { .. })
        ));

        let missing_true = "nodes:\n  - {id: a, type: if, condition: x}\n";
        assert!(matches!(
            parse_workflow_str(missing_true, None),
            Err(ParseError::MissingBranch { field: "trueNext", .. })
        ));

        let stray_branch = "nodes:\n  - {id: a, type: sleep, trueNext: end}\n";
        assert!(matches!(
            parse_workflow_str(stray_branch, None),
            Err(ParseError::UnexpectedBranch { field: "trueNext", .. })
        ));

        let bad_start = "startNode: ghost\nnodes:\n  - {id: a, type: sleep}\n";
        assert_eq!(parse_workflow_str(bad_start, None), Err(ParseError::UnknownStartNode("ghost".into())));

        assert_eq!(parse_workflow_str("nodes: []\n", None), Err(ParseError::Empty));
        assert!(matches!(parse_workflow_str("- 1\n- 2\n", None), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn broken_bundle_reports_the_deserialization_error() {
        let source = "workflows:\n  main:\n    nodes:\n      - id: a\n        name: x\n";
        match parse_workflow_str(source, None) {
            Err(ParseError::Malformed(message)) => assert!(message.contains("type"), "message: {message}"),
            other => panic!("expected a malformed document, got {other:?}"),
        }
    }

    #[test]
    fn end_target_and_generated_ids() {
        let source = "nodes:\n  - {type: sleep, duration: 1, next: end}\n  - {type: sleep}\n";
        let workflow = parse_workflow_str(source, None).expect("parse");
        assert_eq!(workflow.order().collect::<Vec<_>>(), vec!["node-1", "node-2"]);
        assert_eq!(workflow.node(0).expect("first").jumps.next, Target::End);
    }

    #[test]
    fn selects_workflows_from_bundle() {
        let source = r#"
workflows:
  main:
    nodes:
      - {id: a, type: sleep}
  helper:
    description: helper flow
    nodes:
      - {id: b, type: sleep}
"#;
        let helper = parse_workflow_str(source, Some("helper")).expect("helper");
        assert_eq!(helper.name, "helper");
        assert_eq!(helper.description.as_deref(), Some("helper flow"));

        assert!(matches!(parse_workflow_str(source, None), Err(ParseError::AmbiguousWorkflow(_))));
        assert_eq!(
            parse_workflow_str(source, Some("missing")),
            Err(ParseError::UnknownWorkflow("missing".into()))
        );
    }

    #[test]
    fn structured_properties_become_json_text() {
        let source = r#"
nodes:
  - id: call
    type: workflow
    path: child.yaml
    input: { query: "{{q}}" }
"#;
        let workflow = parse_workflow_str(source, None).expect("parse");
        assert_eq!(
            workflow.node_by_id("call").expect("call").property("input"),
            Some(r#"{"query":"{{q}}"}"#)
        );
    }
}
