#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Query(#[from] nebulix_query::QueryError),

    #[error(transparent)]
    Pipeline(#[from] nebulix_query::pipeline::PipelineError),
}
