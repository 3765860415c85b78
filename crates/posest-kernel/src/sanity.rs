//! [`SanityChecker`] – consistency rule engine for pose samples.
//!
//! Only samples that carry [`ConsistencyMetadata`] are checked; a sample
//! without metadata (motion capture, or odometry from a source that reports
//! no covariance) is always sane.  When metadata is present every registered
//! [`SanityRule`] is evaluated in order and the first violation is returned.
//!
//! Built-in rules:
//! - [`FiniteRule`] – position and orientation contain no NaN/∞.
//! - [`CovarianceRule`] – variances are finite, non-negative and the
//!   position variance is under a configured cap.
//! - [`DegradedFlagRule`] – the source has not flagged the estimate as
//!   degraded.

use std::fmt;

use posest_types::{ConsistencyMetadata, PoseSample};

/// Default cap on the largest x/y/z position variance (m²).
pub const DEFAULT_MAX_POSITION_VARIANCE: f64 = 1.0;

// ────────────────────────────────────────────────────────────────────────────
// InvalidSample
// ────────────────────────────────────────────────────────────────────────────

/// Why a sample was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidSample {
    /// Name of the rule that fired.
    pub rule: &'static str,
    pub detail: String,
}

impl fmt::Display for InvalidSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.detail)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single consistency invariant over a sample and its metadata.
pub trait SanityRule: Send + Sync {
    /// Human-readable name used in suppression reasons.
    fn name(&self) -> &'static str;

    /// Return `Err(detail)` when the invariant is violated.
    fn check(&self, sample: &PoseSample, meta: &ConsistencyMetadata) -> Result<(), String>;
}

// ────────────────────────────────────────────────────────────────────────────
// SanityChecker
// ────────────────────────────────────────────────────────────────────────────

/// Validates a candidate sample before it may be published.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use posest_kernel::sanity::SanityChecker;
/// use posest_types::{ConsistencyMetadata, FeedMessage, PoseSample, Quaternion, Vec3};
///
/// let checker = SanityChecker::with_default_rules(1.0);
///
/// // No metadata: always sane.
/// let mocap: PoseSample =
///     FeedMessage::pose(Utc::now(), Vec3::zero(), Quaternion::identity()).into();
/// assert!(checker.is_sane(&mocap));
///
/// // Odometry flagged as degraded.
/// let meta = ConsistencyMetadata { degraded: true, ..Default::default() };
/// let odom: PoseSample = FeedMessage::odometry(
///     Utc::now(), Vec3::zero(), Quaternion::identity(), Vec3::zero(), Some(meta),
/// ).into();
/// assert!(!checker.is_sane(&odom));
/// ```
#[derive(Default)]
pub struct SanityChecker {
    rules: Vec<Box<dyn SanityRule>>,
}

impl SanityChecker {
    /// Create a checker with no rules (every sample passes).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a checker with the three built-in rules.
    pub fn with_default_rules(max_position_variance: f64) -> Self {
        let mut checker = Self::new();
        checker.add_rule(Box::new(FiniteRule));
        checker.add_rule(Box::new(CovarianceRule {
            max_position_variance,
        }));
        checker.add_rule(Box::new(DegradedFlagRule));
        checker
    }

    /// Register a new rule.  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn SanityRule>) {
        self.rules.push(rule);
    }

    /// Names of the registered rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validate `sample`, returning the first violation.
    pub fn verify(&self, sample: &PoseSample) -> Result<(), InvalidSample> {
        let Some(meta) = sample.consistency() else {
            return Ok(());
        };
        for rule in &self.rules {
            rule.check(sample, meta).map_err(|detail| InvalidSample {
                rule: rule.name(),
                detail,
            })?;
        }
        Ok(())
    }

    pub fn is_sane(&self, sample: &PoseSample) -> bool {
        self.verify(sample).is_ok()
    }
}

impl fmt::Debug for SanityChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanityChecker")
            .field("rules", &self.rule_names())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects samples whose position or orientation is not finite.
pub struct FiniteRule;

impl SanityRule for FiniteRule {
    fn name(&self) -> &'static str {
        "finite_pose"
    }

    fn check(&self, sample: &PoseSample, _meta: &ConsistencyMetadata) -> Result<(), String> {
        if !sample.position().is_finite() {
            return Err(format!("non-finite position {:?}", sample.position()));
        }
        if !sample.orientation().is_finite() {
            return Err(format!("non-finite orientation {:?}", sample.orientation()));
        }
        Ok(())
    }
}

/// Rejects samples whose covariance diagonal is malformed or whose position
/// variance exceeds `max_position_variance`.
pub struct CovarianceRule {
    pub max_position_variance: f64,
}

impl SanityRule for CovarianceRule {
    fn name(&self) -> &'static str {
        "covariance"
    }

    fn check(&self, _sample: &PoseSample, meta: &ConsistencyMetadata) -> Result<(), String> {
        if let Some((i, v)) = meta
            .covariance_diagonal
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(format!("covariance diagonal[{i}] = {v} is not a valid variance"));
        }
        let variance = meta.max_position_variance();
        if variance > self.max_position_variance {
            return Err(format!(
                "position variance {variance} exceeds cap {}",
                self.max_position_variance
            ));
        }
        Ok(())
    }
}

/// Rejects samples the source itself flagged as degraded.
///
/// The rosbridge decoder sets the flag from the ROS unavailable-covariance
/// marker; other transports may set it from their own track-loss signal.
pub struct DegradedFlagRule;

impl SanityRule for DegradedFlagRule {
    fn name(&self) -> &'static str {
        "degraded_flag"
    }

    fn check(&self, _sample: &PoseSample, meta: &ConsistencyMetadata) -> Result<(), String> {
        if meta.degraded {
            Err("source reports a degraded estimate".to_string())
        } else {
            Ok(())
        }
    }
}
