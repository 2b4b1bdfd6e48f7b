use crate::config::{AppConfig, ClassificationConfig, ClassifierMode};
use crate::types::{BiClass, DemographicRecord, FoodAccessRecord, JoinedRecord, TractId};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Records excluded or left uncolored while joining and classifying.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinReport {
    pub matched: usize,
    /// Demographic tracts with no score row.
    pub unmatched_tracts: usize,
    /// Score rows with no demographic tract.
    pub unmatched_scores: usize,
    /// Matched tracts dropped for a missing demographic percentage.
    pub missing_percent: usize,
    /// Matched tracts kept but left without a class (NaN inputs).
    pub unclassified: usize,
}

/// Inner join on the canonical tract identifier, followed by classification
/// and color assignment. Unmatched rows on either side are dropped and
/// counted; matched rows missing the demographic percentage are dropped and
/// counted.
pub fn join_and_classify(
    config: &AppConfig,
    tracts: Vec<DemographicRecord>,
    scores: &[FoodAccessRecord],
) -> (Vec<JoinedRecord>, JoinReport) {
    let score_by_tract: HashMap<TractId, f64> = scores
        .iter()
        .map(|r| (r.tract_id, r.access_score))
        .collect();

    let mut records = Vec::new();
    let mut report = JoinReport::default();
    let mut matched: HashSet<TractId> = HashSet::new();

    for tract in tracts {
        let access_score = match score_by_tract.get(&tract.tract_id) {
            Some(&score) => score,
            None => {
                report.unmatched_tracts += 1;
                continue;
            }
        };
        matched.insert(tract.tract_id);

        let percent_poc = match tract.percent_poc.filter(|v| !v.is_nan()) {
            Some(v) => v,
            None => {
                report.missing_percent += 1;
                continue;
            }
        };

        let bi_class = classify(config, Some(percent_poc), Some(access_score));
        if bi_class.is_none() {
            report.unclassified += 1;
        }
        let color = bi_class.and_then(|c| color_for(&config.colors, &c).map(str::to_owned));

        records.push(JoinedRecord {
            tract_id: tract.tract_id,
            percent_poc,
            access_score,
            geometry: tract.geometry,
            bi_class,
            color,
        });
    }

    report.matched = records.len();
    report.unmatched_scores = score_by_tract
        .keys()
        .filter(|id| !matched.contains(id))
        .count();

    if report.unmatched_tracts > 0 || report.unmatched_scores > 0 || report.missing_percent > 0 {
        warn!(
            unmatched_tracts = report.unmatched_tracts,
            unmatched_scores = report.unmatched_scores,
            missing_percent = report.missing_percent,
            "Dropped rows during join"
        );
    }
    info!(
        matched = report.matched,
        unclassified = report.unclassified,
        "Joined and classified tracts"
    );

    (records, report)
}

/// Classifies a pair of values using the configured mode.
pub fn classify(
    config: &AppConfig,
    percent_poc: Option<f64>,
    access_score: Option<f64>,
) -> Option<BiClass> {
    match config.classification.mode {
        ClassifierMode::Fixed => classify_fixed(&config.classification, percent_poc, access_score),
        ClassifierMode::Quantile => classify_quantile(percent_poc, access_score),
    }
}

/// Fixed-threshold classifier. Breaks are closed upper bounds: a value equal
/// to the first break falls in class 1, not class 2.
pub fn classify_fixed(
    config: &ClassificationConfig,
    percent_poc: Option<f64>,
    access_score: Option<f64>,
) -> Option<BiClass> {
    let x = numeric(percent_poc)?;
    let y = numeric(access_score)?;
    Some(BiClass::new(
        class_for(x, &config.percent_breaks),
        class_for(y, &config.score_breaks),
    ))
}

/// Legacy classifier: tertile breaks computed per pair from the pair itself.
///
/// A two-value sample cannot carry a meaningful tertile split, so equal
/// inputs collapse to the middle class "22". Kept for comparison with
/// earlier map runs only; use [`classify_fixed`] for anything new.
pub fn classify_quantile(percent_poc: Option<f64>, access_score: Option<f64>) -> Option<BiClass> {
    let x = numeric(percent_poc)?;
    let y = numeric(access_score)?;

    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    if lo == hi {
        return Some(BiClass::new(2, 2));
    }

    let breaks = [
        lo + (hi - lo) * (1.0 / 3.0),
        lo + (hi - lo) * (2.0 / 3.0),
    ];
    Some(BiClass::new(class_for(x, &breaks), class_for(y, &breaks)))
}

fn numeric(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

fn class_for(value: f64, breaks: &[f64; 2]) -> u8 {
    if value <= breaks[0] {
        1
    } else if value <= breaks[1] {
        2
    } else {
        3
    }
}

/// Looks up the hex color for a bivariate code. Codes absent from the table
/// get no color, which excludes the record from rendering.
pub fn color_for<'a>(colors: &'a HashMap<String, String>, class: &BiClass) -> Option<&'a str> {
    colors.get(class.code().as_str()).map(String::as_str)
}
