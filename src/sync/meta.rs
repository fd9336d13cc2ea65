//! Campaigns and campaign insights exported from the Meta ads API.
//!
//! Meta reports every number as a string and budgets in cents, so everything
//! is parsed and checked here before it reaches the database.

use std::str::FromStr;

use serde::Deserialize;
use time::{Date, macros::format_description};

use crate::{Error, campaign::Campaign};

/// A campaign as returned by the campaigns endpoint of the ads API.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaCampaign {
    pub id: String,
    pub name: String,
    /// Daily budget in cents.
    #[serde(default)]
    pub daily_budget: Option<String>,
    /// Lifetime budget in cents, used when there is no daily budget.
    #[serde(default)]
    pub lifetime_budget: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
}

/// Lifetime performance figures of a single campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaCampaignInsight {
    pub campaign_id: String,
    pub spend: String,
    pub impressions: String,
    pub clicks: String,
    #[serde(default)]
    pub actions: Vec<MetaAction>,
    #[serde(default)]
    pub action_values: Vec<MetaAction>,
}

/// A conversion count or value reported for one action type, e.g. "purchase".
#[derive(Debug, Clone, Deserialize)]
pub struct MetaAction {
    pub action_type: String,
    pub value: String,
}

const PURCHASE_ACTION: &str = "purchase";
const OMNI_PURCHASE_ACTION: &str = "omni_purchase";

/// Convert a campaign and its insight (if the ad account reported one) into a [Campaign].
///
/// Campaigns without an insight have not spent anything yet, so their
/// performance figures are zero.
///
/// # Errors
/// Returns [Error::InvalidPayload] if the campaign ID is empty, if a number
/// or date cannot be parsed, or if a figure is negative.
pub fn to_campaign(
    campaign: &MetaCampaign,
    insight: Option<&MetaCampaignInsight>,
) -> Result<Campaign, Error> {
    if campaign.id.trim().is_empty() {
        return Err(Error::InvalidPayload(format!(
            "campaign \"{}\" has an empty ID",
            campaign.name
        )));
    }

    let budget = match (&campaign.daily_budget, &campaign.lifetime_budget) {
        (Some(cents), _) | (None, Some(cents)) => {
            Some(parse_non_negative::<f64>("budget", cents)? / 100.0)
        }
        (None, None) => None,
    };

    let (spend, impressions, clicks, purchases, purchase_value) = match insight {
        Some(insight) => (
            parse_non_negative("spend", &insight.spend)?,
            parse_non_negative("impressions", &insight.impressions)?,
            parse_non_negative("clicks", &insight.clicks)?,
            purchase_action(&insight.actions)
                .map(|value| parse_non_negative("purchases", value))
                .transpose()?
                .unwrap_or(0),
            purchase_action(&insight.action_values)
                .map(|value| parse_non_negative("purchase value", value))
                .transpose()?
                .unwrap_or(0.0),
        ),
        None => (0.0, 0, 0, 0, 0.0),
    };

    Ok(Campaign {
        id: campaign.id.clone(),
        name: campaign.name.clone(),
        budget,
        spend,
        impressions,
        clicks,
        purchases,
        purchase_value,
        start_date: campaign.start_time.as_deref().map(parse_date).transpose()?,
        end_date: campaign.stop_time.as_deref().map(parse_date).transpose()?,
    })
}

/// Find the purchase figure among `actions`.
///
/// Meta reports website purchases as "purchase" and, for campaigns that also
/// sell in-app or offline, the combined figure as "omni_purchase". Both
/// describe the same orders, so "omni_purchase" is only used when there is
/// no "purchase" entry.
fn purchase_action(actions: &[MetaAction]) -> Option<&str> {
    let find = |action_type: &str| {
        actions
            .iter()
            .find(|action| action.action_type == action_type)
            .map(|action| action.value.as_str())
    };

    find(PURCHASE_ACTION).or_else(|| find(OMNI_PURCHASE_ACTION))
}

fn parse_non_negative<T: FromStr>(field: &str, text: &str) -> Result<T, Error> {
    let not_a_number = || Error::InvalidPayload(format!("{field} \"{text}\" is not a number"));

    // Checking the sign and range as a float first also rejects "NaN" and "inf".
    let number: f64 = text.trim().parse().map_err(|_| not_a_number())?;
    if !number.is_finite() {
        return Err(not_a_number());
    }
    if number < 0.0 {
        return Err(Error::InvalidPayload(format!(
            "{field} \"{text}\" must not be negative"
        )));
    }

    text.trim().parse().map_err(|_| not_a_number())
}

/// Parse the date part of a timestamp such as "2024-03-01T09:30:00+1300".
pub(super) fn parse_date(timestamp: &str) -> Result<Date, Error> {
    timestamp
        .get(..10)
        .and_then(|date| Date::parse(date, format_description!("[year]-[month]-[day]")).ok())
        .ok_or_else(|| Error::InvalidPayload(format!("\"{timestamp}\" is not a valid date")))
}
