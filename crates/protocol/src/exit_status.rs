use std::cmp::Ordering;

/// Process/health/job exit status, ordered so "worse" compares greater
/// (spec §4.9: the supervisor returns `max(statuses)` as its exit code;
/// spec §6: the health command returns 0/1/2/other).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Everything completed successfully.
    Ok,
    /// Partial success: at least one warning was reported.
    Warning,
    /// Fatal failure, or an unreachable server.
    Critical,
    /// A code the peer sent that this side does not recognize.
    Unknown(u8),
}

impl ExitStatus {
    /// Numeric rank used for ordering and for the process exit code.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Warning => 1,
            ExitStatus::Critical => 2,
            ExitStatus::Unknown(code) => code,
        }
    }

    /// Combines two statuses, keeping the worse of the two (spec §4.9, §8).
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl From<u8> for ExitStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => ExitStatus::Ok,
            1 => ExitStatus::Warning,
            2 => ExitStatus::Critical,
            other => ExitStatus::Unknown(other),
        }
    }
}

impl From<ExitStatus> for u8 {
    fn from(status: ExitStatus) -> Self {
        status.rank()
    }
}

impl PartialOrd for ExitStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExitStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Ok => write!(f, "OK"),
            ExitStatus::Warning => write!(f, "WARNING"),
            ExitStatus::Critical => write!(f, "CRITICAL"),
            ExitStatus::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        for code in [0u8, 1, 2, 7, 255] {
            let status = ExitStatus::from(code);
            assert_eq!(u8::from(status), code);
        }
    }

    #[test]
    fn combine_keeps_the_worse_status() {
        assert_eq!(ExitStatus::Ok.combine(ExitStatus::Warning), ExitStatus::Warning);
        assert_eq!(ExitStatus::Critical.combine(ExitStatus::Ok), ExitStatus::Critical);
        assert_eq!(
            ExitStatus::Warning.combine(ExitStatus::Unknown(9)),
            ExitStatus::Unknown(9)
        );
    }

    #[test]
    fn ordering_matches_severity() {
        assert!(ExitStatus::Ok < ExitStatus::Warning);
        assert!(ExitStatus::Warning < ExitStatus::Critical);
        assert!(ExitStatus::Critical < ExitStatus::Unknown(3));
    }
}
