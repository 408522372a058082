use chrono::{Duration, NaiveDateTime};

use crate::config::BookingPolicyConfig;
use crate::domain::booking::Booking;
use crate::domain::change::{ChangeQuote, RejectionReason};

/// Fee tiers and the change cutoff. Amounts are whole VND.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingPolicy {
    pub cutoff: Duration,
    pub same_day_fee: i64,
    pub different_day_fee: i64,
    pub fallback_base_price: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from(&BookingPolicyConfig::default())
    }
}

impl From<&BookingPolicyConfig> for BookingPolicy {
    fn from(config: &BookingPolicyConfig) -> Self {
        Self {
            cutoff: Duration::hours(i64::from(config.cutoff_hours)),
            same_day_fee: config.same_day_fee,
            different_day_fee: config.different_day_fee,
            fallback_base_price: config.fallback_base_price,
        }
    }
}

impl BookingPolicy {
    /// Same calendar day as the current departure pays the lower tier.
    pub fn change_fee(&self, current: &NaiveDateTime, target: &NaiveDateTime) -> i64 {
        if current.date() == target.date() {
            self.same_day_fee
        } else {
            self.different_day_fee
        }
    }

    pub fn is_past_cutoff(&self, departure: &NaiveDateTime, now: &NaiveDateTime) -> bool {
        *departure - *now <= self.cutoff
    }

    pub fn quote_change(
        &self,
        booking: &Booking,
        target: NaiveDateTime,
        now: NaiveDateTime,
    ) -> ChangeQuote {
        if !booking.is_paid() {
            return ChangeQuote::NotAllowed { reason: RejectionReason::InvalidStatus };
        }
        if self.is_past_cutoff(&booking.departure, &now) {
            return ChangeQuote::NotAllowed { reason: RejectionReason::PastCutoff };
        }
        ChangeQuote::Allowed {
            fee: self.change_fee(&booking.departure, &target),
            new_departure: target,
        }
    }

    pub fn refund_amount(&self, base_price: i64, change_fees: i64) -> i64 {
        base_price + change_fees
    }
}
