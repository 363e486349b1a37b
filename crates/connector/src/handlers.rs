//! Named processor and criterion implementations supplied by the application

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::HandlerError;
use wflink_wire::{CriteriaRequest, CriteriaResponse, ErrorInfo, ProcessorRequest, ProcessorResponse};

pub const PROCESSOR_NOT_FOUND: &str = "PROCESSOR_NOT_FOUND";
pub const CRITERIA_NOT_FOUND: &str = "CRITERIA_NOT_FOUND";
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
pub const HANDLER_PANIC: &str = "HANDLER_PANIC";

/// Computes a new payload for an entity
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, request: &ProcessorRequest) -> Result<Value, HandlerError>;
}

/// Decides whether an entity matches
#[async_trait]
pub trait Criterion: Send + Sync {
    async fn evaluate(&self, request: &CriteriaRequest) -> Result<bool, HandlerError>;
}

/// Processors and criteria by name.
///
/// Every request gets a response: unknown names, handler errors and
/// handler panics all become `success = false` responses.
#[derive(Default)]
pub struct HandlerRegistry {
    processors: DashMap<String, Arc<dyn Processor>>,
    criteria: DashMap<String, Arc<dyn Criterion>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn Processor>) {
        let name = name.into();
        if self.processors.insert(name.clone(), processor).is_some() {
            warn!(processor = %name, "Processor re-registered, previous one replaced");
        }
    }

    pub fn register_criterion(&self, name: impl Into<String>, criterion: Arc<dyn Criterion>) {
        let name = name.into();
        if self.criteria.insert(name.clone(), criterion).is_some() {
            warn!(criteria = %name, "Criterion re-registered, previous one replaced");
        }
    }

    pub fn processor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn criteria_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.criteria.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn process(&self, request: &ProcessorRequest) -> ProcessorResponse {
        // Clone the Arc out so no map guard is held across the await
        let processor = self
            .processors
            .get(&request.processor_name)
            .map(|e| Arc::clone(e.value()));
        let Some(processor) = processor else {
            warn!(processor = %request.processor_name, request_id = %request.request_id, "No processor registered");
            return ProcessorResponse::failed(
                request,
                ErrorInfo::new(
                    PROCESSOR_NOT_FOUND,
                    format!("no processor registered as '{}'", request.processor_name),
                ),
            );
        };

        debug!(processor = %request.processor_name, entity_id = %request.entity_id, "Running processor");
        match AssertUnwindSafe(processor.process(request)).catch_unwind().await {
            Ok(Ok(payload)) => ProcessorResponse::ok(request, payload),
            Ok(Err(e)) => {
                warn!(processor = %request.processor_name, error = %e, "Processor failed");
                ProcessorResponse::failed(request, ErrorInfo::new(HANDLER_ERROR, e.to_string()))
            }
            Err(_) => {
                error!(processor = %request.processor_name, "Processor panicked");
                ProcessorResponse::failed(
                    request,
                    ErrorInfo::new(HANDLER_PANIC, "processor panicked"),
                )
            }
        }
    }

    pub async fn evaluate(&self, request: &CriteriaRequest) -> CriteriaResponse {
        let criterion = self
            .criteria
            .get(&request.criteria_name)
            .map(|e| Arc::clone(e.value()));
        let Some(criterion) = criterion else {
            warn!(criteria = %request.criteria_name, request_id = %request.request_id, "No criterion registered");
            return CriteriaResponse::failed(
                request,
                ErrorInfo::new(
                    CRITERIA_NOT_FOUND,
                    format!("no criterion registered as '{}'", request.criteria_name),
                ),
            );
        };

        debug!(criteria = %request.criteria_name, entity_id = %request.entity_id, "Evaluating criterion");
        match AssertUnwindSafe(criterion.evaluate(request)).catch_unwind().await {
            Ok(Ok(matches)) => CriteriaResponse::ok(request, matches),
            Ok(Err(e)) => {
                warn!(criteria = %request.criteria_name, error = %e, "Criterion failed");
                CriteriaResponse::failed(request, ErrorInfo::new(HANDLER_ERROR, e.to_string()))
            }
            Err(_) => {
                error!(criteria = %request.criteria_name, "Criterion panicked");
                CriteriaResponse::failed(request, ErrorInfo::new(HANDLER_PANIC, "criterion panicked"))
            }
        }
    }
}
