//! Dashboard aggregates
//!
//! Pure functions from contact and deal snapshots to chart-ready series.
//! Rendering is up to the presentation layer.

use crate::adapters::{Contact, Deal, DealStage};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

/// Months covered by the new-contacts series, current month included.
pub const CONTACT_SERIES_MONTHS: u32 = 6;

/// Window for "recent" contacts.
pub const RECENT_CONTACT_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: DealStage,
    pub count: usize,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyCount {
    /// `YYYY-MM`
    pub month: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_contacts: usize,
    pub recent_contacts: usize,
    pub total_deals: usize,
    /// One entry per stage, in pipeline order, zero-filled.
    pub pipeline: Vec<StageSummary>,
    pub open_pipeline_value: u64,
    pub won_value: u64,
    /// won / (won + lost); `None` until a deal has closed.
    pub win_rate: Option<f64>,
    /// Oldest month first.
    pub contacts_by_month: Vec<MonthlyCount>,
}

impl DashboardSummary {
    pub fn compute(contacts: &[Contact], deals: &[Deal], now: DateTime<Utc>) -> Self {
        let recent_cutoff = now - Duration::days(RECENT_CONTACT_DAYS);
        let recent_contacts = contacts
            .iter()
            .filter(|c| c.created_at > recent_cutoff && c.created_at <= now)
            .count();

        let pipeline: Vec<StageSummary> = DealStage::ALL
            .into_iter()
            .map(|stage| {
                let in_stage = deals.iter().filter(|d| d.stage == stage);
                StageSummary {
                    stage,
                    count: in_stage.clone().count(),
                    value: in_stage.map(|d| d.value).sum(),
                }
            })
            .collect();

        let open_pipeline_value = pipeline
            .iter()
            .filter(|s| !s.stage.is_closed())
            .map(|s| s.value)
            .sum();
        let stage_count = |stage: DealStage| {
            pipeline
                .iter()
                .find(|s| s.stage == stage)
                .map_or(0, |s| s.count)
        };
        let won = stage_count(DealStage::Won);
        let lost = stage_count(DealStage::Lost);
        let win_rate = (won + lost > 0).then(|| won as f64 / (won + lost) as f64);
        let won_value = pipeline
            .iter()
            .find(|s| s.stage == DealStage::Won)
            .map_or(0, |s| s.value);

        Self {
            total_contacts: contacts.len(),
            recent_contacts,
            total_deals: deals.len(),
            open_pipeline_value,
            won_value,
            win_rate,
            contacts_by_month: contacts_by_month(contacts, now),
            pipeline,
        }
    }
}

fn contacts_by_month(contacts: &[Contact], now: DateTime<Utc>) -> Vec<MonthlyCount> {
    (0..CONTACT_SERIES_MONTHS)
        .rev()
        .map(|back| {
            let (year, month) = months_before(now.year(), now.month(), back);
            let count = contacts
                .iter()
                .filter(|c| c.created_at.year() == year && c.created_at.month() == month)
                .count();
            MonthlyCount {
                month: format!("{year:04}-{month:02}"),
                count,
            }
        })
        .collect()
}

fn months_before(year: i32, month: u32, back: u32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) - back as i32;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}
