use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = u64;
pub type UserId = u64;
pub type LocationCode = u32;
pub type CategoryCode = u32;
pub type FeatureCode = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: f64,
    pub max: f64,
}

/// Catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub location: Option<LocationCode>,
    #[serde(default)]
    pub salary: Option<SalaryRange>,
    #[serde(default)]
    pub categories: Vec<CategoryCode>,
    #[serde(default)]
    pub features: Vec<FeatureCode>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A job with every optional field missing
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            location: None,
            salary: None,
            categories: Vec::new(),
            features: Vec::new(),
            posted_at: None,
        }
    }

    pub fn with_location(mut self, location: LocationCode) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_salary(mut self, min: f64, max: f64) -> Self {
        self.salary = Some(SalaryRange { min, max });
        self
    }

    pub fn with_categories(mut self, categories: impl Into<Vec<CategoryCode>>) -> Self {
        self.categories = categories.into();
        self.categories.sort_unstable();
        self.categories.dedup();
        self
    }

    pub fn with_features(mut self, features: impl Into<Vec<FeatureCode>>) -> Self {
        self.features = features.into();
        self.features.sort_unstable();
        self.features.dedup();
        self
    }

    pub fn posted_at(mut self, posted_at: DateTime<Utc>) -> Self {
        self.posted_at = Some(posted_at);
        self
    }

    /// Sort and de-duplicate code sets so overlaps are linear merges
    pub(crate) fn normalize(&mut self) {
        self.categories.sort_unstable();
        self.categories.dedup();
        self.features.sort_unstable();
        self.features.dedup();
    }
}

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub location: Option<LocationCode>,
    #[serde(default)]
    pub radius_km: f32,
    #[serde(default)]
    pub salary_expectation: Option<f64>,
    #[serde(default)]
    pub preferred_categories: Vec<CategoryCode>,
    #[serde(default)]
    pub preferred_features: Vec<FeatureCode>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            location: None,
            radius_km: 0.0,
            salary_expectation: None,
            preferred_categories: Vec::new(),
            preferred_features: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: LocationCode, radius_km: f32) -> Self {
        self.location = Some(location);
        self.radius_km = radius_km;
        self
    }

    pub fn with_salary_expectation(mut self, expectation: f64) -> Self {
        self.salary_expectation = Some(expectation);
        self
    }

    pub fn with_categories(mut self, categories: impl Into<Vec<CategoryCode>>) -> Self {
        self.preferred_categories = categories.into();
        self.normalize();
        self
    }

    pub fn with_features(mut self, features: impl Into<Vec<FeatureCode>>) -> Self {
        self.preferred_features = features.into();
        self.normalize();
        self
    }

    pub(crate) fn normalize(&mut self) {
        self.preferred_categories.sort_unstable();
        self.preferred_categories.dedup();
        self.preferred_features.sort_unstable();
        self.preferred_features.dedup();
    }

    /// Reject values no scoring rule can interpret
    pub fn validate(&self) -> Result<()> {
        if !self.radius_km.is_finite() || self.radius_km < 0.0 {
            return Err(EngineError::InvalidUser {
                user_id: self.id,
                reason: format!("radius_km must be finite and >= 0, got {}", self.radius_km),
            });
        }
        if let Some(expectation) = self.salary_expectation {
            if !expectation.is_finite() || expectation < 0.0 {
                return Err(EngineError::InvalidUser {
                    user_id: self.id,
                    reason: format!(
                        "salary_expectation must be finite and >= 0, got {}",
                        expectation
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Score components in a fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Base,
    Category,
    Salary,
    Feature,
    Freshness,
    Location,
}

impl Component {
    pub const COUNT: usize = 6;

    pub const ALL: [Component; Component::COUNT] = [
        Component::Base,
        Component::Category,
        Component::Salary,
        Component::Feature,
        Component::Freshness,
        Component::Location,
    ];

    /// Column index in component matrices
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Base => "base",
            Component::Category => "category",
            Component::Salary => "salary",
            Component::Feature => "feature",
            Component::Freshness => "freshness",
            Component::Location => "location",
        }
    }
}

/// One value per component; used for sub-scores, confidences and weights
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentScores {
    pub base: f32,
    pub category: f32,
    pub salary: f32,
    pub feature: f32,
    pub freshness: f32,
    pub location: f32,
}

impl ComponentScores {
    pub fn splat(value: f32) -> Self {
        Self::from_array([value; Component::COUNT])
    }

    pub fn from_array(values: [f32; Component::COUNT]) -> Self {
        let [base, category, salary, feature, freshness, location] = values;
        Self {
            base,
            category,
            salary,
            feature,
            freshness,
            location,
        }
    }

    pub fn to_array(&self) -> [f32; Component::COUNT] {
        [
            self.base,
            self.category,
            self.salary,
            self.feature,
            self.freshness,
            self.location,
        ]
    }

    pub fn get(&self, component: Component) -> f32 {
        self.to_array()[component.index()]
    }

    pub fn sum(&self) -> f32 {
        self.to_array().iter().sum()
    }
}

/// Per (user, job) breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub values: ComponentScores,
    pub confidence: ComponentScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredJob {
    pub job_id: JobId,
    pub score: f32,
    /// 1-based; zero until assigned by the top-K selector
    pub rank: u32,
    pub confidence: f32,
    pub components: ScoreComponents,
}

/// Payload delivered to the result sink for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMatches {
    pub user_id: UserId,
    pub matches: Vec<ScoredJob>,
    pub fallback_used: bool,
}
