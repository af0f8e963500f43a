/// The pipeline phase a status message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelinePhase {
    #[default]
    TaskCatalog,
    VoltageLog,
    Temperature,
}

/// Progress message sent from the pipeline to the UI thread.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub phase: PipelinePhase,
}

impl WorkerStatus {
    pub fn new(progress: f32, phase: PipelinePhase) -> Self {
        Self { progress, phase }
    }
}
