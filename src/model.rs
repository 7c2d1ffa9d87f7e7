use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::{fs, path::Path};

use crate::error::{EngineError, EngineResult};
use crate::features::{FEATURE_DIM, FEATURE_NAMES};

/// A trained binary classifier: ordered feature vector in, success probability out.
pub trait SuccessModel: Send + Sync {
    fn input_dim(&self) -> usize;

    fn predict_proba(&self, x: &[f64]) -> EngineResult<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticWeights {
    pub weights: Vec<f64>,
    pub bias: f64,
}

/// Linear classifier squashed through a sigmoid.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticModel {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl From<LogisticWeights> for LogisticModel {
    fn from(w: LogisticWeights) -> Self {
        Self::new(w.weights, w.bias)
    }
}

impl SuccessModel for LogisticModel {
    fn input_dim(&self) -> usize {
        self.weights.len()
    }

    fn predict_proba(&self, x: &[f64]) -> EngineResult<f64> {
        if x.len() != self.weights.len() {
            return Err(EngineError::FeatureShapeMismatch {
                expected: self.weights.len(),
                got: x.len(),
            });
        }
        let z: f64 = self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
        Ok(sigmoid(z))
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// One classifier per maneuver family, plus the factor weights reported to callers.
#[derive(Clone)]
pub struct ModelBundle {
    pub undercut: Arc<dyn SuccessModel>,
    pub overcut: Arc<dyn SuccessModel>,
    pub feat_list: Vec<String>,
    pub undercut_factors: BTreeMap<String, f64>,
    pub overcut_factors: BTreeMap<String, f64>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("in_dim", &self.undercut.input_dim())
            .field("feat_list", &self.feat_list)
            .finish()
    }
}

impl ModelBundle {
    pub fn new(undercut: Arc<dyn SuccessModel>, overcut: Arc<dyn SuccessModel>) -> Self {
        Self {
            undercut,
            overcut,
            feat_list: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            undercut_factors: BTreeMap::new(),
            overcut_factors: BTreeMap::new(),
        }
    }

    /// Checks that both classifiers take exactly the engine's feature vector.
    pub fn check_shape(&self) -> EngineResult<()> {
        for m in [&self.undercut, &self.overcut] {
            if m.input_dim() != FEATURE_DIM {
                return Err(EngineError::FeatureShapeMismatch {
                    expected: m.input_dim(),
                    got: FEATURE_DIM,
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ArtifactJson {
    feat_list: Vec<String>,
    undercut: LogisticWeights,
    overcut: LogisticWeights,
    #[serde(default)]
    feature_importance: Option<ImportanceJson>,
}

#[derive(Deserialize)]
struct ImportanceJson {
    undercut: BTreeMap<String, f64>,
    overcut: BTreeMap<String, f64>,
}

/// Loads a logistic artifact (JSON) into a bundle.
pub fn load_logistic(path: impl AsRef<Path>) -> Result<ModelBundle> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path)
        .with_context(|| format!("failed to read model artifact at {}", path.display()))?;
    let art: ArtifactJson =
        serde_json::from_str(&txt).with_context(|| "failed to parse model artifact JSON")?;

    if art.feat_list != FEATURE_NAMES {
        bail!(
            "artifact feat_list {:?} does not match engine order {:?}",
            art.feat_list,
            FEATURE_NAMES
        );
    }
    for (name, w) in [("undercut", &art.undercut), ("overcut", &art.overcut)] {
        if w.weights.len() != art.feat_list.len() {
            bail!(
                "{} weights have {} entries, feat_list has {}",
                name,
                w.weights.len(),
                art.feat_list.len()
            );
        }
        if !w.bias.is_finite() || w.weights.iter().any(|v| !v.is_finite()) {
            bail!("{} weights contain non-finite values", name);
        }
    }

    let mut bundle = ModelBundle::new(
        Arc::new(LogisticModel::from(art.undercut)),
        Arc::new(LogisticModel::from(art.overcut)),
    );
    bundle.feat_list = art.feat_list;
    if let Some(imp) = art.feature_importance {
        bundle.undercut_factors = imp.undercut;
        bundle.overcut_factors = imp.overcut;
    }
    Ok(bundle)
}

#[cfg(feature = "torch")]
pub mod torch {
    //! TorchScript backend. The module must map `[1, in_dim]` to a single logit.

    use super::*;
    use parking_lot::Mutex;
    use tch::{kind::Kind, CModule, Device, Tensor};

    #[derive(Deserialize)]
    struct MetaJson {
        feat_list: Vec<String>,
        in_dim: Option<usize>,
    }

    pub struct TorchModel {
        // CModule is not Sync; forward passes are serialized.
        model: Mutex<CModule>,
        device: Device,
        in_dim: usize,
    }

    impl TorchModel {
        pub fn new(model_path: &str, meta_path: &str) -> Result<(Self, Vec<String>)> {
            let device = Device::Cpu;

            let meta_txt = fs::read_to_string(Path::new(meta_path))
                .with_context(|| format!("failed to read meta at {}", meta_path))?;
            let meta: MetaJson =
                serde_json::from_str(&meta_txt).with_context(|| "failed to parse meta.json")?;
            let in_dim = meta.in_dim.unwrap_or(meta.feat_list.len());

            let model = CModule::load_on_device(model_path, device)
                .with_context(|| format!("failed to load TorchScript {}", model_path))?;

            // Check output shape with a dummy forward: expect [1, 1]
            let dummy = Tensor::zeros([1, in_dim as i64], (Kind::Float, device));
            let t = model.forward_ts(&[dummy])?;
            let sz = t.size();
            if sz.len() != 2 || sz[0] != 1 || sz[1] != 1 {
                bail!("unexpected model output size: {:?}", sz);
            }

            Ok((
                Self {
                    model: Mutex::new(model),
                    device,
                    in_dim,
                },
                meta.feat_list,
            ))
        }
    }

    impl SuccessModel for TorchModel {
        fn input_dim(&self) -> usize {
            self.in_dim
        }

        fn predict_proba(&self, x: &[f64]) -> EngineResult<f64> {
            if x.len() != self.in_dim {
                return Err(EngineError::FeatureShapeMismatch {
                    expected: self.in_dim,
                    got: x.len(),
                });
            }
            let xs: Vec<f32> = x.iter().map(|v| *v as f32).collect();
            let input = Tensor::from_slice(&xs)
                .reshape([1, self.in_dim as i64])
                .to_device(self.device);
            let out = self
                .model
                .lock()
                .forward_ts(&[input])
                .map_err(|e| EngineError::Model(e.to_string()))?;
            Ok(out.sigmoid().double_value(&[0, 0]))
        }
    }

    /// Loads one TorchScript module per maneuver: `<dir>/undercut.pt`, `<dir>/overcut.pt`.
    pub fn load_torch(model_dir: &str, meta_path: &str) -> Result<ModelBundle> {
        let dir = Path::new(model_dir);
        let (under, feat_list) =
            TorchModel::new(&dir.join("undercut.pt").to_string_lossy(), meta_path)?;
        let (over, _) = TorchModel::new(&dir.join("overcut.pt").to_string_lossy(), meta_path)?;
        if feat_list != FEATURE_NAMES {
            bail!("meta feat_list {:?} does not match engine order", feat_list);
        }
        let mut bundle = ModelBundle::new(Arc::new(under), Arc::new(over));
        bundle.feat_list = feat_list;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logistic_zero_weights_is_half() {
        let m = LogisticModel::new(vec![0.0; FEATURE_DIM], 0.0);
        assert_eq!(m.predict_proba(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(), 0.5);
    }

    #[test]
    fn test_logistic_shape_mismatch() {
        let m = LogisticModel::new(vec![1.0; 4], 0.0);
        assert_eq!(
            m.predict_proba(&[0.0; FEATURE_DIM]).unwrap_err(),
            EngineError::FeatureShapeMismatch { expected: 4, got: 5 }
        );
    }

    #[test]
    fn test_bundle_shape_check() {
        let good: Arc<dyn SuccessModel> = Arc::new(LogisticModel::new(vec![0.0; FEATURE_DIM], 0.0));
        let bad: Arc<dyn SuccessModel> = Arc::new(LogisticModel::new(vec![0.0; 3], 0.0));
        assert!(ModelBundle::new(good.clone(), good.clone()).check_shape().is_ok());
        assert!(ModelBundle::new(good, bad).check_shape().is_err());
    }

    #[test]
    fn test_load_shipped_artifact() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/models/strategy_model.json");
        let bundle = load_logistic(path).unwrap();
        assert!(bundle.check_shape().is_ok());
        assert_eq!(bundle.undercut_factors.len(), FEATURE_DIM);
    }

    #[test]
    fn test_load_missing_artifact() {
        let err = load_logistic("/nonexistent/model.json").unwrap_err();
        assert!(err.to_string().contains("failed to read model artifact"));
    }
}
