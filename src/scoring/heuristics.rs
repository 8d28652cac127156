//! Pure scoring factors
//!
//! Every function returns a [`FactorScore`] clamped to 0-100. These are the
//! deterministic paths used when the AI collaborator is not consulted, and
//! the fallback when it fails.

use chrono::{DateTime, Timelike, Utc};

use super::FactorScore;
use crate::analytics::TrendingTopic;
use crate::config::LanguageProfile;
use crate::models::ContentItem;

/// Score per hour of distance from the nearest peak hour
const TIMING_PENALTY_PER_HOUR: f64 = 12.0;

/// Content quality from structural signals of title and body
pub fn content_quality(item: &ContentItem) -> FactorScore {
    let mut score: f64 = 40.0;

    let title_len = item.title.chars().count();
    if (20..=100).contains(&title_len) {
        score += 15.0;
    } else if title_len < 8 {
        score -= 15.0;
    }

    let body_words = item.body.split_whitespace().count();
    if body_words >= 150 {
        score += 20.0;
    } else if body_words >= 50 {
        score += 10.0;
    } else if body_words == 0 {
        score -= 10.0;
    }

    if item.category.is_some() {
        score += 10.0;
    }
    if item.title.chars().any(|c| c.is_ascii_digit()) {
        score += 5.0;
    }
    if item.title.contains('?') || item.title.contains('!') {
        score += 5.0;
    }

    FactorScore::new(score, 50.0)
}

/// Alignment of the item with active trending topics
///
/// - no active topics: neutral 50 with low confidence
/// - matches: best viral potential plus 5 per extra match
/// - no match: 20
pub fn trend_alignment(item: &ContentItem, topics: &[TrendingTopic]) -> FactorScore {
    if topics.is_empty() {
        return FactorScore::new(50.0, 30.0);
    }

    let text = format!("{} {}", item.title, item.body).to_lowercase();
    let matched: Vec<&TrendingTopic> = topics
        .iter()
        .filter(|t| !t.keyword.is_empty() && text.contains(&t.keyword.to_lowercase()))
        .collect();

    if matched.is_empty() {
        return FactorScore::new(20.0, 70.0);
    }

    let best = matched
        .iter()
        .map(|t| t.viral_potential)
        .fold(0.0_f64, f64::max);
    let bonus = 5.0 * (matched.len() - 1) as f64;
    FactorScore::new((best + bonus).min(100.0), 80.0)
}

/// How close `now` is to one of the language's peak hours
pub fn timing_fitness(profile: Option<&LanguageProfile>, now: DateTime<Utc>) -> FactorScore {
    let Some(profile) = profile else {
        return FactorScore::new(50.0, 30.0);
    };
    let Some(distance) = peak_distance(profile, now) else {
        return FactorScore::new(50.0, 30.0);
    };

    FactorScore::new(100.0 - TIMING_PENALTY_PER_HOUR * f64::from(distance), 90.0)
}

/// Hours from the local hour of `now` to the nearest peak, wrapping midnight
pub fn peak_distance(profile: &LanguageProfile, now: DateTime<Utc>) -> Option<u32> {
    let hour = profile.local_time(now).hour();
    profile
        .peak_hours
        .iter()
        .map(|&peak| {
            let d = hour.abs_diff(peak % 24);
            d.min(24 - d)
        })
        .min()
}

/// Fit of the item's category with the audience's preferred categories
pub fn audience_fitness(item: &ContentItem, profile: Option<&LanguageProfile>) -> FactorScore {
    let (Some(category), Some(profile)) = (item.category.as_deref(), profile) else {
        return FactorScore::new(50.0, 40.0);
    };

    let rank = profile
        .preferred_categories
        .iter()
        .position(|c| c.eq_ignore_ascii_case(category));

    match rank {
        Some(i) => FactorScore::new((100.0 - 15.0 * i as f64).max(60.0), 75.0),
        None => FactorScore::new(35.0, 75.0),
    }
}
