//! A single demand frame: offset, limits and full count

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::executor::error::{ExecError, ExecResult};

/// Demand for one subquery depth
///
/// `offset` rows are skipped before any row counts against a limit. A soft
/// limit bounds one answer only; the caller may ask again. A hard limit is
/// final: once reached no further rows are produced, and with `full_count`
/// the remaining rows are still counted as skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub offset: u64,
    pub soft_limit: Option<u64>,
    pub hard_limit: Option<u64>,
    pub full_count: bool,
}

impl Call {
    /// Unbounded call: everything, no skipping
    pub fn new() -> Self {
        Call::default()
    }

    /// Call for at most `n` rows this round
    pub fn with_soft_limit(n: u64) -> Self {
        Call {
            soft_limit: Some(n),
            ..Call::default()
        }
    }

    /// Call for at most `n` rows in total
    pub fn with_hard_limit(n: u64) -> Self {
        Call {
            hard_limit: Some(n),
            ..Call::default()
        }
    }

    /// Fast-forward call: produce nothing, count nothing
    pub fn fast_forward() -> Self {
        Call::with_hard_limit(0)
    }

    /// Produce nothing, but count every remaining row
    pub fn full_count_only() -> Self {
        Call {
            hard_limit: Some(0),
            full_count: true,
            ..Call::default()
        }
    }

    /// Set the offset
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Request full count
    pub fn full_count(mut self) -> Self {
        self.full_count = true;
        self
    }

    /// Check the call is well formed
    pub fn validate(&self) -> ExecResult<()> {
        if self.soft_limit.is_some() && self.hard_limit.is_some() {
            return Err(ExecError::InvalidCall(
                "soft and hard limit are mutually exclusive".to_string(),
            ));
        }
        if self.soft_limit.is_some() && self.full_count {
            return Err(ExecError::InvalidCall(
                "full count requires a hard limit".to_string(),
            ));
        }
        Ok(())
    }

    /// Rows that may still be produced
    pub fn limit(&self) -> u64 {
        match (self.soft_limit, self.hard_limit) {
            (Some(s), Some(h)) => s.min(h),
            (Some(s), None) => s,
            (None, Some(h)) => h,
            (None, None) => u64::MAX,
        }
    }

    /// Check if a hard limit is set
    pub fn has_hard_limit(&self) -> bool {
        self.hard_limit.is_some()
    }

    /// Check if a soft limit is set
    pub fn has_soft_limit(&self) -> bool {
        self.soft_limit.is_some()
    }

    /// Full count only applies under a hard limit
    pub fn needs_full_count(&self) -> bool {
        self.full_count && self.hard_limit.is_some()
    }

    /// Check if offset rows are still to be skipped
    pub fn need_skip_more(&self) -> bool {
        self.offset > 0
    }

    /// Check if the hard limit is used up
    pub fn hard_limit_reached(&self) -> bool {
        self.hard_limit == Some(0)
    }

    /// Check if the caller has no use for further rows
    pub fn wants_nothing(&self) -> bool {
        self.hard_limit_reached() && !self.needs_full_count() && !self.need_skip_more()
    }

    /// Rows to discard without producing them: the remaining offset, or
    /// everything once the hard limit is reached under full count
    pub fn rows_to_skip(&self) -> u64 {
        if self.offset > 0 {
            self.offset
        } else if self.needs_full_count() && self.hard_limit_reached() {
            u64::MAX
        } else {
            0
        }
    }

    /// Account for `n` skipped rows
    pub fn did_skip(&mut self, n: u64) {
        self.offset = self.offset.saturating_sub(n);
    }

    /// Account for `n` produced rows
    pub fn did_produce(&mut self, n: u64) {
        if let Some(s) = self.soft_limit.as_mut() {
            *s = s.saturating_sub(n);
        }
        if let Some(h) = self.hard_limit.as_mut() {
            *h = h.saturating_sub(n);
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{skip: {}", self.offset)?;
        match (self.soft_limit, self.hard_limit) {
            (Some(s), _) => write!(f, ", softLimit: {}", s)?,
            (None, Some(h)) => write!(f, ", hardLimit: {}", h)?,
            (None, None) => write!(f, ", limit: none")?,
        }
        write!(f, ", fullCount: {}}}", self.full_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert_eq!(Call::new().limit(), u64::MAX);
        assert_eq!(Call::with_soft_limit(5).limit(), 5);
        assert_eq!(Call::with_hard_limit(3).limit(), 3);
        assert!(Call::fast_forward().hard_limit_reached());
        assert!(Call::full_count_only().needs_full_count());
        assert!(!Call::new().full_count().needs_full_count());
    }

    #[test]
    fn test_accounting() {
        let mut call = Call::with_hard_limit(10).offset(2);
        call.did_skip(1);
        assert_eq!(call.offset, 1);
        call.did_skip(5);
        assert_eq!(call.offset, 0);
        call.did_produce(4);
        assert_eq!(call.limit(), 6);
        call.did_produce(100);
        assert!(call.hard_limit_reached());
    }

    #[test]
    fn test_rows_to_skip() {
        assert_eq!(Call::new().offset(3).rows_to_skip(), 3);
        assert_eq!(Call::full_count_only().rows_to_skip(), u64::MAX);
        assert_eq!(Call::fast_forward().rows_to_skip(), 0);
        assert_eq!(Call::with_hard_limit(2).full_count().rows_to_skip(), 0);
    }

    #[test]
    fn test_wants_nothing() {
        assert!(Call::fast_forward().wants_nothing());
        assert!(!Call::full_count_only().wants_nothing());
        assert!(!Call::fast_forward().offset(2).wants_nothing());
        assert!(!Call::new().wants_nothing());
    }

    #[test]
    fn test_validate() {
        Call::new().validate().unwrap();
        Call::full_count_only().validate().unwrap();
        let both = Call {
            soft_limit: Some(1),
            hard_limit: Some(1),
            ..Call::default()
        };
        assert!(both.validate().is_err());
        assert!(Call::with_soft_limit(1).full_count().validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Call::with_hard_limit(2).offset(1).to_string(),
            "{skip: 1, hardLimit: 2, fullCount: false}"
        );
    }
}
