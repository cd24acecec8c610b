use crate::{
    config::ModelConfig,
    features::{FeatureVector, FEATURE_COUNT},
    forest::{ForestError, ForestParams, RandomForestRegressor},
};
use ndarray::{array, Array1, Array2};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read model artifact {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load model artifact {path:?}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: ForestError,
    },
    #[error(transparent)]
    Forest(#[from] ForestError),
}

pub trait ModelService: Send + Sync + 'static {
    /// Raw calorie estimate for one feature vector.
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;
}

/// Serves predictions from a random forest resolved on first use.
///
/// The forest is read from the configured artifact if it exists, otherwise
/// a placeholder is fitted on a handful of example sessions. Whatever is
/// resolved is kept for the life of the process and never reloaded. A failed
/// load is not cached, so the next request tries again.
pub struct ForestModelService {
    model_path: PathBuf,
    fallback: ForestParams,
    model: OnceLock<Arc<RandomForestRegressor>>,
}

impl ForestModelService {
    pub fn new(model_config: &ModelConfig) -> Self {
        Self {
            model_path: model_config.get_path(),
            fallback: model_config.fallback,
            model: OnceLock::new(),
        }
    }

    pub fn get_model(&self) -> Result<Arc<RandomForestRegressor>, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        // Two first requests may both get here and build a forest. Both are
        // equivalent, so whichever lands in the cell first is kept.
        let model = Arc::new(self.load()?);
        Ok(self.model.get_or_init(|| model).clone())
    }

    fn load(&self) -> Result<RandomForestRegressor, ModelError> {
        if self.model_path.exists() {
            tracing::info!("Loading model artifact from {:?}", self.model_path);
            return load_artifact(&self.model_path);
        }

        tracing::info!(
            "No model artifact at {:?}, fitting fallback forest ({} estimators, max depth {})",
            self.model_path,
            self.fallback.n_estimators,
            self.fallback.max_depth
        );
        Ok(fit_fallback(self.fallback)?)
    }
}

impl ModelService for ForestModelService {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let model = self.get_model()?;
        Ok(model.predict_row(features.view())?)
    }
}

fn load_artifact(path: &Path) -> Result<RandomForestRegressor, ModelError> {
    let document = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact_error = |source| ModelError::Artifact {
        path: path.to_path_buf(),
        source,
    };

    let forest = RandomForestRegressor::from_json(&document).map_err(artifact_error)?;
    if forest.n_features() != FEATURE_COUNT {
        return Err(artifact_error(ForestError::FeatureMismatch {
            expected: FEATURE_COUNT,
            got: forest.n_features(),
        }));
    }

    Ok(forest)
}

/// Example sessions: age, BMI, duration, heart rate, body temperature, gender.
fn fallback_training_set() -> (Array2<f64>, Array1<f64>) {
    let x = array![
        [25.0, 24.0, 30.0, 120.0, 98.6, 1.0],
        [30.0, 25.0, 45.0, 130.0, 98.8, 1.0],
        [35.0, 26.0, 20.0, 110.0, 98.5, 0.0],
        [28.0, 23.0, 60.0, 140.0, 99.0, 1.0],
        [40.0, 27.0, 30.0, 125.0, 98.7, 0.0],
    ];
    let y = array![250.0, 350.0, 200.0, 450.0, 280.0];
    (x, y)
}

pub fn fit_fallback(params: ForestParams) -> Result<RandomForestRegressor, ForestError> {
    let (x, y) = fallback_training_set();
    RandomForestRegressor::fit(params, x.view(), y.view())
}
