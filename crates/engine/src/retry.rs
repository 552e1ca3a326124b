use std::time::Duration;

/// Backoff between a failed attempt and the automatic retry that follows it.
///
/// Every variant is capped so a long-failing job never waits longer than
/// `max` before its next attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// `base * multiplier^n`, optionally spread by a deterministic jitter.
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
        /// Stretch the delay by 0 to 40 percent depending on `n`, so jobs
        /// that failed together do not all come back at the same instant.
        jitter: bool,
    },
    /// `delay * (n + 1)`, capped at `max`.
    Linear { delay: Duration, max: Duration },
    /// The same delay before every retry.
    Constant { delay: Duration },
}

impl RetryStrategy {
    /// Delay before retry number `n`, counting from zero.
    ///
    /// The engine passes `attempt - 1` of the attempt that just failed, so
    /// the first automatic retry waits `delay_for(0)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use vaultline_engine::RetryStrategy;
    ///
    /// let linear = RetryStrategy::Linear {
    ///     delay: Duration::from_secs(10),
    ///     max: Duration::from_secs(25),
    /// };
    /// assert_eq!(linear.delay_for(0), Duration::from_secs(10));
    /// assert_eq!(linear.delay_for(4), Duration::from_secs(25));
    /// ```
    pub fn delay_for(&self, n: u32) -> Duration {
        let secs = match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                // Retry budgets are tiny, the exponent cannot wrap.
                #[allow(clippy::cast_possible_wrap)]
                let mut secs = base.as_secs_f64() * multiplier.powi(n as i32);
                if *jitter {
                    secs *= 1.0 + 0.1 * f64::from(n % 5);
                }
                secs.min(max.as_secs_f64())
            }
            Self::Linear { delay, max } => (delay.as_secs_f64() * f64::from(n.saturating_add(1))).min(max.as_secs_f64()),
            Self::Constant { delay } => return *delay,
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(30),
            max: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}
