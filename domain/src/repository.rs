use uuid::Uuid;

use crate::model::entity::{CalcState, Calculation};

#[async_trait::async_trait]
pub trait CalculationRepository: Send + Sync {
    async fn insert(&self, calculation: Calculation) -> anyhow::Result<()>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Calculation>>;
    async fn get_by_state(&self, state: CalcState) -> anyhow::Result<Vec<Calculation>>;
    /// Replace the stored calculation with the same id
    async fn update(&self, calculation: Calculation) -> anyhow::Result<()>;
}
