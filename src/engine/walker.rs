//! Depth-first tree walker
//!
//! At each node-set: stop beyond the depth limit; if a converting rule
//! matches the path, convert, normalize, resolve and merge the result on top
//! of the inherited context (emitting it at split rules); then descend into
//! every child with the resulting context.

use super::report::{FailureKind, WalkFailure, WalkReport};
use crate::convert::{convert_subtree, ConversionClient};
use crate::emit::EmissionSink;
use crate::mapping::{AttributeCatalog, Conversion, MappingRule, RuleTable};
use crate::nested::build_on;
use crate::terminology::{resolve_field, TerminologyClient};
use crate::tree::{normalize_record, path, Record, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

type WalkFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Immutable mapping state, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rules: Arc<RuleTable>,
    pub attributes: Arc<AttributeCatalog>,
    /// Deepest node-set level that is still visited; the document root is 1
    pub depth_limit: usize,
}

/// External services the walker calls.
#[derive(Clone)]
pub struct Collaborators {
    pub converter: Arc<dyn ConversionClient>,
    pub terminology: Arc<dyn TerminologyClient>,
    pub sink: Arc<dyn EmissionSink>,
}

/// The mapping engine.
pub struct Engine {
    config: EngineConfig,
    collaborators: Collaborators,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Walk one document from the root with an empty context.
    pub async fn walk_document(&self, document: &Record) -> WalkReport {
        let mut report = WalkReport::new();
        self.walk(document, 1, String::new(), Record::new(), &mut report)
            .await;
        report
    }

    /// Visit a node-set at `depth` and `path` with the context inherited from
    /// the caller.
    pub fn walk<'a>(
        &'a self,
        nodes: &'a Record,
        depth: usize,
        path: String,
        inherited: Record,
        report: &'a mut WalkReport,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            if depth > self.config.depth_limit {
                debug!(path = %path, depth, "depth limit reached");
                report.truncated += 1;
                return;
            }
            report.visited += 1;

            let context = match self.config.rules.matching(&path) {
                Some((rule, conversion)) => {
                    match self.apply(conversion, nodes, &path, &inherited).await {
                        Ok(merged) => {
                            report.applied.push(path.clone());
                            if rule.split {
                                self.emit(rule, &path, &merged, report).await;
                            }
                            merged
                        }
                        Err(kind) => {
                            warn!(path = %path, error = %kind, "rule produced no output");
                            report.failures.push(WalkFailure::new(path.clone(), kind));
                            inherited
                        }
                    }
                }
                None => inherited,
            };

            for (key, value) in nodes {
                let child = path::child(&path, key);
                self.descend(value, depth + 1, child, &context, report).await;
            }
        })
    }

    fn descend<'a>(
        &'a self,
        value: &'a Value,
        depth: usize,
        path: String,
        context: &'a Record,
        report: &'a mut WalkReport,
    ) -> WalkFuture<'a> {
        match value {
            Value::Map(nodes) => self.walk(nodes, depth, path, context.clone(), report),
            Value::Sequence(items) => Box::pin(async move {
                for item in items {
                    self.descend(item, depth, path.clone(), context, report).await;
                }
            }),
            Value::Scalar(_) => Box::pin(async {}),
        }
    }

    /// Convert, normalize, resolve and merge on top of `inherited`.
    async fn apply(
        &self,
        conversion: &Conversion,
        nodes: &Record,
        path: &str,
        inherited: &Record,
    ) -> Result<Record, FailureKind> {
        let mut flat = convert_subtree(self.collaborators.converter.as_ref(), conversion, nodes)
            .await
            .map_err(FailureKind::Conversion)?;
        normalize_record(&mut flat);

        let mut resolved = Record::with_capacity(flat.len());
        for (field, values) in flat {
            let terminology = self.config.attributes.field(&conversion.target.code, &field);
            let values = resolve_field(
                self.collaborators.terminology.as_ref(),
                terminology,
                &field,
                values,
            )
            .await
            .map_err(FailureKind::Resolution)?;
            resolved.insert(field, values);
        }

        debug!(path = %path, fields = resolved.len(), "merging converted fields");
        build_on(inherited.clone(), resolved).map_err(FailureKind::Merge)
    }

    async fn emit(&self, rule: &MappingRule, path: &str, record: &Record, report: &mut WalkReport) {
        let Some(template_id) = rule.template_id.as_deref() else {
            report.failures.push(WalkFailure::new(
                path,
                FailureKind::Emission {
                    template_id: String::new(),
                    message: "split rule has no template".to_string(),
                },
            ));
            return;
        };

        match self.collaborators.sink.emit(template_id, record).await {
            Ok(outcome) => report.emitted.push(outcome),
            Err(e) => {
                warn!(path = %path, template = %template_id, error = %e, "emission failed");
                report.failures.push(WalkFailure::new(
                    path,
                    FailureKind::Emission {
                        template_id: template_id.to_string(),
                        message: e.to_string(),
                    },
                ));
            }
        }
    }
}
