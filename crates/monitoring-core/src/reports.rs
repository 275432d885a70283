//! Programación de reportes de irregularidades.
//!
//! La generación del reporte corre fuera de este crate: aquí sólo se valida
//! la petición y se entrega a una cola de tareas como una tarea opaca con
//! nombre y parámetros (`TaskQueue::create_task`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::MonitoringError;

pub const IRREGULARITY_REPORT_TASK: &str = "irregularity_report";

/// Tarea aceptada por la cola.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub id: Uuid,
    pub name: String,
    pub params: BTreeMap<String, Value>,
    /// SHA-256 (hex) del nombre y los parámetros canónicos.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Colaborador externo que agenda tareas asíncronas.
pub trait TaskQueue {
    fn create_task(&self, name: &str, params: BTreeMap<String, Value>) -> Result<TaskHandle, MonitoringError>;
}

/// Huella determinista de una tarea. `BTreeMap` serializa con claves
/// ordenadas, así que el JSON resultante es canónico.
pub fn task_fingerprint(name: &str, params: &BTreeMap<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(params).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Cola en memoria: deduplica por huella (la misma petición devuelve la
/// misma tarea).
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: DashMap<String, TaskHandle>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tareas agendadas, por fecha de creación.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        let mut out: Vec<TaskHandle> = self.tasks.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn create_task(&self, name: &str, params: BTreeMap<String, Value>) -> Result<TaskHandle, MonitoringError> {
        if name.trim().is_empty() {
            return Err(MonitoringError::TaskQueue("task name is empty".into()));
        }
        let fingerprint = task_fingerprint(name, &params);
        let handle = self.tasks
                         .entry(fingerprint.clone())
                         .or_insert_with(|| TaskHandle { id: Uuid::new_v4(),
                                                         name: name.to_string(),
                                                         params,
                                                         fingerprint,
                                                         created_at: Utc::now() })
                         .value()
                         .clone();
        Ok(handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrregularityReportRequest {
    pub delivery_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub requested_by: Option<String>,
}

impl IrregularityReportRequest {
    /// Valida la ventana y arma los parámetros de la tarea.
    pub fn task_params(&self) -> Result<BTreeMap<String, Value>, MonitoringError> {
        if self.from > self.to {
            return Err(MonitoringError::InvalidReportWindow { from: self.from, to: self.to });
        }
        if self.delivery_id.trim().is_empty() {
            return Err(MonitoringError::TaskQueue("delivery_id is empty".into()));
        }
        let mut params = BTreeMap::new();
        params.insert("delivery_id".to_string(), Value::String(self.delivery_id.clone()));
        params.insert("from".to_string(), Value::String(self.from.to_rfc3339()));
        params.insert("to".to_string(), Value::String(self.to.to_rfc3339()));
        params.insert("requested_by".to_string(),
                      self.requested_by.clone().map(Value::String).unwrap_or(Value::Null));
        Ok(params)
    }
}

pub struct ReportScheduler<Q: TaskQueue> {
    queue: Q,
}

impl<Q: TaskQueue> ReportScheduler<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn schedule_irregularity_report(&self, request: &IrregularityReportRequest) -> Result<TaskHandle, MonitoringError> {
        let handle = self.queue.create_task(IRREGULARITY_REPORT_TASK, request.task_params()?)?;
        debug!("irregularity report scheduled: task={} delivery={}", handle.id, request.delivery_id);
        Ok(handle)
    }
}
