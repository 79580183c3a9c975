use std::path::{Path, PathBuf};

use anyhow::Context;
use domain::{
    model::entity::{CalcState, Calculation},
    repository::CalculationRepository,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Calculations kept in memory and mirrored to `calculations.json` after every change.
pub struct JsonDb {
    calculations: Mutex<Vec<Calculation>>,
    path: PathBuf,
}

impl JsonDb {
    pub async fn new(save_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let save_dir = save_dir.as_ref();
        tokio::fs::create_dir_all(save_dir)
            .await
            .with_context(|| format!("Unable to create {}", save_dir.display()))?;

        let path = save_dir.join("calculations.json");
        let calculations: Vec<Calculation> = match tokio::fs::read(&path).await {
            Ok(x) => serde_json::from_slice(&x)
                .with_context(|| format!("Corrupted calculation store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(e).context(format!("Unable to read {}", path.display())),
        };
        tracing::debug!(path = %path.display(), count = calculations.len(), "Calculation store loaded");

        Ok(Self {
            calculations: Mutex::new(calculations),
            path,
        })
    }

    async fn save(&self, calculations: &[Calculation]) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(calculations)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Unable to write {}", self.path.display()))
    }
}

#[async_trait::async_trait]
impl CalculationRepository for JsonDb {
    async fn insert(&self, calculation: Calculation) -> anyhow::Result<()> {
        let mut calculations = self.calculations.lock().await;
        anyhow::ensure!(
            calculations.iter().all(|c| c.id != calculation.id),
            "Calculation {} already exists",
            calculation.id
        );
        calculations.push(calculation);
        self.save(&calculations).await
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Calculation>> {
        let calculations = self.calculations.lock().await;
        Ok(calculations.iter().find(|c| c.id == id).cloned())
    }

    async fn get_by_state(&self, state: CalcState) -> anyhow::Result<Vec<Calculation>> {
        let calculations = self.calculations.lock().await;
        Ok(calculations.iter().filter(|c| c.state == state).cloned().collect())
    }

    async fn update(&self, calculation: Calculation) -> anyhow::Result<()> {
        let mut calculations = self.calculations.lock().await;
        let slot = calculations
            .iter_mut()
            .find(|c| c.id == calculation.id)
            .with_context(|| format!("Calculation {} not found", calculation.id))?;
        *slot = calculation;
        self.save(&calculations).await
    }
}
