use crate::{
    config::Config,
    dns::DnsHostResolver,
    error::AppError,
    features::{ExtractedFeatures, FeatureExtractor},
    model::{Classifier, TrainedModel},
    rdap::RdapResolver,
    types::{ClassificationResult, Label},
};
use std::{sync::Arc, time::Instant};
use tracing::info;
use uuid::Uuid;

pub const LEGITIMATE_REASON: &str = "The URL does not exhibit typical phishing characteristics.";

/// Extraction plus classification for a single URL.
pub struct PhishingEngine {
    extractor: FeatureExtractor,
    classifier: Arc<dyn Classifier>,
}

impl PhishingEngine {
    pub fn new(extractor: FeatureExtractor, classifier: Arc<dyn Classifier>) -> Self {
        Self { extractor, classifier }
    }

    /// Wires the production resolvers and the configured model artifact.
    pub async fn from_config(config: &Config) -> Result<Self, AppError> {
        info!("Initializing phishing engine...");

        let domain_info = RdapResolver::new(&config.lookups).await?;
        let hosts = DnsHostResolver::new();
        let extractor = FeatureExtractor::new(
            Arc::new(domain_info),
            Arc::new(hosts),
            config.lookups.timeout(),
        );

        let model = TrainedModel::load_or_neutral(&config.model.path)?;

        info!(
            "Phishing engine ready (model {}, labels {})",
            model.version(),
            model.labels().version
        );
        Ok(Self::new(extractor, Arc::new(model)))
    }

    pub fn model_version(&self) -> &str {
        self.classifier.version()
    }

    pub async fn classify(&self, raw_url: &str) -> Result<ClassificationResult, AppError> {
        let start = Instant::now();

        let features = self.extractor.extract(raw_url).await;
        let label = self.classifier.classify(&features.vector)?;
        let result = verdict(raw_url, label, features);

        metrics::counter!("predictions_total", "label" => label.as_str()).increment(1);
        metrics::histogram!("predict_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        info!(
            decision_id = %result.decision_id,
            label = %label,
            reasons = result.reasons.len(),
            "Classified {}",
            raw_url
        );

        Ok(result)
    }
}

/// Legitimate verdicts carry a single reassurance instead of the fired
/// heuristics, and only phishing verdicts may be blocked.
pub fn verdict(raw_url: &str, label: Label, features: ExtractedFeatures) -> ClassificationResult {
    let reasons = match label {
        Label::Legitimate => vec![LEGITIMATE_REASON.to_string()],
        Label::Phishing | Label::Suspicious => features.reasons,
    };

    ClassificationResult {
        decision_id: Uuid::new_v4(),
        label,
        url: raw_url.to_string(),
        reasons,
        block_eligible: label == Label::Phishing,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        error::ModelError,
        features::{
            reasons,
            tests::{established_domain, StubDomainInfo, StubHosts},
        },
        layout::slot,
        lookup::LookupResult,
        model::{ClassLabel, LabelConvention},
        types::FeatureVector,
    };
    use std::time::Duration;

    /// Phishing when the host is an IP literal, otherwise legitimate.
    pub(crate) struct IpRule;

    impl Classifier for IpRule {
        fn predict(&self, vector: &FeatureVector) -> Result<ClassLabel, ModelError> {
            Ok(if vector.get(slot::IP_ADDRESS) == 1.0 { 1 } else { 0 })
        }

        fn labels(&self) -> &LabelConvention {
            static LABELS: once_cell::sync::Lazy<LabelConvention> =
                once_cell::sync::Lazy::new(LabelConvention::v1);
            &LABELS
        }

        fn version(&self) -> &str {
            "ip-rule"
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn predict(&self, _vector: &FeatureVector) -> Result<ClassLabel, ModelError> {
            Err(ModelError::Inference("weights missing".to_string()))
        }

        fn labels(&self) -> &LabelConvention {
            unreachable!()
        }

        fn version(&self) -> &str {
            "broken"
        }
    }

    pub(crate) fn engine_with(classifier: Arc<dyn Classifier>) -> PhishingEngine {
        let extractor = FeatureExtractor::new(
            Arc::new(StubDomainInfo(LookupResult::Success(established_domain()))),
            Arc::new(StubHosts::ok()),
            Duration::from_secs(1),
        );
        PhishingEngine::new(extractor, classifier)
    }

    #[tokio::test]
    async fn test_phishing_verdict_keeps_reasons_and_is_blockable() {
        let engine = engine_with(Arc::new(IpRule));
        let result = engine.classify("http://192.168.1.1/login").await.unwrap();

        assert_eq!(result.label, Label::Phishing);
        assert!(result.block_eligible);
        assert_eq!(result.url, "http://192.168.1.1/login");
        assert!(result.reasons.iter().any(|r| r == reasons::IP_ADDRESS));
    }

    #[tokio::test]
    async fn test_legitimate_verdict_replaces_reasons() {
        let engine = engine_with(Arc::new(IpRule));
        let result = engine.classify("example.com").await.unwrap();

        assert_eq!(result.label, Label::Legitimate);
        assert!(!result.block_eligible);
        assert_eq!(result.url, "example.com");
        assert_eq!(result.reasons, vec![LEGITIMATE_REASON.to_string()]);
    }

    #[tokio::test]
    async fn test_suspicious_verdict_is_not_blockable() {
        let engine = engine_with(Arc::new(TrainedModel::neutral()));
        let result = engine.classify("http://192.168.1.1").await.unwrap();

        assert_eq!(result.label, Label::Suspicious);
        assert!(!result.block_eligible);
        assert!(result.reasons.iter().any(|r| r == reasons::IP_ADDRESS));
        assert_eq!(engine.model_version(), "neutral");
    }

    #[tokio::test]
    async fn test_classifier_failure_surfaces_as_error() {
        let engine = engine_with(Arc::new(Broken));
        let err = engine.classify("example.com").await.unwrap_err();
        assert!(matches!(err, AppError::Model(ModelError::Inference(_))));
    }

    #[tokio::test]
    async fn test_decision_ids_are_unique() {
        let engine = engine_with(Arc::new(IpRule));
        let a = engine.classify("example.com").await.unwrap();
        let b = engine.classify("example.com").await.unwrap();
        assert_ne!(a.decision_id, b.decision_id);
        assert_eq!(a.reasons, b.reasons);
    }
}
