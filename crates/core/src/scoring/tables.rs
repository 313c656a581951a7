use std::collections::HashMap;

/// Rating used for the threshold filter when the caller's label is unknown.
pub const DEFAULT_MIN_RATING: f64 = 3.0;

/// Label and verb-phrase weights. Built once and handed to the engine.
#[derive(Debug, Clone)]
pub struct ScoringTables {
    ratings: HashMap<String, f64>,
    actions: HashMap<String, f64>,
}

impl ScoringTables {
    pub fn new<R, A>(ratings: R, actions: A) -> Self
    where
        R: IntoIterator<Item = (String, f64)>,
        A: IntoIterator<Item = (String, f64)>,
    {
        Self {
            ratings: ratings.into_iter().collect(),
            actions: actions.into_iter().collect(),
        }
    }

    pub fn rating_value(&self, label: &str) -> Option<f64> {
        self.ratings.get(label).copied()
    }

    pub fn action_value(&self, action: &str) -> Option<f64> {
        self.actions.get(action).copied()
    }
}

impl Default for ScoringTables {
    fn default() -> Self {
        let ratings = [
            ("Buy", 5.0),
            ("Outperform", 4.0),
            ("Overweight", 4.0),
            ("Equal Weight", 3.0),
            ("Sector Perform", 3.0),
            ("Hold", 2.0),
            ("Underperform", 1.0),
            ("Sell", 0.0),
        ];
        let actions = [
            ("upgraded by", 5.0),
            ("target raised by", 3.0),
            ("reiterated by", 1.0),
            ("target lowered by", -2.0),
            ("downgraded by", -4.0),
        ];
        Self::new(
            ratings.map(|(k, v)| (k.to_string(), v)),
            actions.map(|(k, v)| (k.to_string(), v)),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub change_percent: f64,
    pub price_log: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            change_percent: 2.0,
            price_log: 2.0,
        }
    }
}
