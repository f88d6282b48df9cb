//! Age-weighted random fragmentation.
//!
//! No topic detection, no heuristics: after each message the run is split
//! with a probability that grows with the message's age. Old history
//! shatters into many small fragments; recent history stays in long,
//! intact ones.
//!
//! For a message of age `t` hours the split probability is
//!
//! ```text
//! p = min(sample_rate * (1 + min(t, 10) ^ age_weight_exponent), 0.95)
//! ```
//!
//! A fragment that reaches `max_fragment_size` is always cut, and a random
//! cut needs at least `min_fragment_size` messages. The last message never
//! triggers a cut: the trailing fragment is emitted as-is.

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};

use crate::Message;
use crate::paging::fragmenter::{Fragment, Fragmenter, FragmenterConfig};

/// Age beyond which a message counts as no older (hours).
const MAX_AGE_HOURS: f64 = 10.0;

/// Upper bound on the split probability, so even ancient runs keep some
/// multi-message fragments.
const MAX_SPLIT_PROBABILITY: f64 = 0.95;

/// Age-biased stochastic [`Fragmenter`].
#[derive(Debug, Clone, Default)]
pub struct RandomSamplingFragmenter {
    /// Reference time for ages. `None` reads the clock on every call.
    now: Option<DateTime<Utc>>,
}

impl RandomSamplingFragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure ages against a fixed instant instead of the clock.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Some(now) }
    }

    /// Split probability after `message`, as seen at `now`.
    ///
    /// Messages stamped in the future count as age zero.
    pub fn split_probability(
        message: &Message,
        now: DateTime<Utc>,
        config: &FragmenterConfig,
    ) -> f64 {
        let age_seconds = (now - message.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        let age_factor = (age_seconds / 3600.0)
            .min(MAX_AGE_HOURS)
            .powf(config.age_weight_exponent);
        (config.sample_rate * (1.0 + age_factor)).min(MAX_SPLIT_PROBABILITY)
    }
}

impl Fragmenter for RandomSamplingFragmenter {
    fn fragment(
        &self,
        messages: &[Message],
        config: &FragmenterConfig,
        rng: &mut dyn RngCore,
    ) -> Vec<Fragment> {
        if messages.is_empty() {
            return Vec::new();
        }

        let now = self.now.unwrap_or_else(Utc::now);
        let last = messages.len() - 1;
        let mut fragments = Vec::new();
        let mut current: Vec<Message> = Vec::new();

        for (i, msg) in messages.iter().enumerate() {
            current.push(msg.clone());

            // Forced splits short-circuit, so they never consume a draw.
            let should_split = current.len() >= config.max_fragment_size
                || (current.len() >= config.min_fragment_size
                    && rng.gen_range(0.0..1.0) < Self::split_probability(msg, now, config));

            if should_split && i < last {
                fragments.push(Fragment::new(std::mem::take(&mut current)));
            }
        }

        if !current.is_empty() {
            fragments.push(Fragment::new(current));
        }

        fragments
    }

    fn name(&self) -> &str {
        "random_sampling"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn batch(n: usize, now: DateTime<Utc>, age: Duration) -> Vec<Message> {
        (0..n)
            .map(|i| Message::user(format!("message {i}")).with_timestamp(now - age))
            .collect()
    }

    fn concat(fragments: &[Fragment]) -> Vec<Message> {
        fragments
            .iter()
            .flat_map(|f| f.messages().iter().cloned())
            .collect()
    }

    #[test]
    fn empty_input_yields_no_fragments() {
        let mut rng = StdRng::seed_from_u64(1);
        let frags =
            RandomSamplingFragmenter::new().fragment(&[], &FragmenterConfig::default(), &mut rng);
        assert!(frags.is_empty());
    }

    #[test]
    fn single_message_is_one_fragment() {
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(1);
        let config = FragmenterConfig::default().with_sample_rate(1.0);
        let frags = RandomSamplingFragmenter::at(now).fragment(
            &batch(1, now, Duration::hours(9)),
            &config,
            &mut rng,
        );
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].metadata().count, 1);
    }

    #[test]
    fn same_seed_same_fragments() {
        let now = Utc::now();
        let messages = batch(50, now, Duration::hours(2));
        let config = FragmenterConfig::default();
        let fragmenter = RandomSamplingFragmenter::at(now);

        let a = fragmenter.fragment(&messages, &config, &mut StdRng::seed_from_u64(42));
        let b = fragmenter.fragment(&messages, &config, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn zero_rate_recent_batch_only_forced_splits() {
        let now = Utc::now();
        let config = FragmenterConfig::default()
            .with_sample_rate(0.0)
            .with_max_fragment_size(4);
        let frags = RandomSamplingFragmenter::at(now).fragment(
            &batch(10, now, Duration::zero()),
            &config,
            &mut StdRng::seed_from_u64(7),
        );
        let sizes: Vec<usize> = frags.iter().map(Fragment::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn split_probability_grows_with_age_and_caps() {
        let now = Utc::now();
        let config = FragmenterConfig::default();
        let p = |age: Duration| {
            RandomSamplingFragmenter::split_probability(
                &Message::user("x").with_timestamp(now - age),
                now,
                &config,
            )
        };

        assert!((p(Duration::zero()) - 0.2).abs() < 1e-9);
        // One hour: 0.2 * (1 + 1^1.5) = 0.4
        assert!((p(Duration::hours(1)) - 0.4).abs() < 1e-9);
        assert!(p(Duration::minutes(30)) < p(Duration::hours(1)));
        assert_eq!(p(Duration::hours(10)), MAX_SPLIT_PROBABILITY);
        assert_eq!(p(Duration::hours(1000)), MAX_SPLIT_PROBABILITY);
        // Future timestamps count as brand new.
        assert!((p(Duration::hours(-3)) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn older_batches_fragment_more() {
        let now = Utc::now();
        let config = FragmenterConfig::default();
        let fragmenter = RandomSamplingFragmenter::at(now);
        let recent = batch(20, now, Duration::zero());
        let old = batch(20, now, Duration::hours(5));
        let mut rng = StdRng::seed_from_u64(2024);

        let trials = 200;
        let mut recent_total = 0;
        let mut old_total = 0;
        for _ in 0..trials {
            recent_total += fragmenter.fragment(&recent, &config, &mut rng).len();
            old_total += fragmenter.fragment(&old, &config, &mut rng).len();
        }
        let recent_avg = recent_total as f64 / trials as f64;
        let old_avg = old_total as f64 / trials as f64;
        assert!(
            old_avg > recent_avg + 5.0,
            "old avg {old_avg} should exceed recent avg {recent_avg}"
        );
    }

    proptest! {
        #[test]
        fn fragments_cover_input_exactly(
            n in 0usize..60,
            age_minutes in 0i64..900,
            sample_rate in 0.0f64..=1.0,
            min_size in 1usize..5,
            max_size in 1usize..25,
            seed in any::<u64>(),
        ) {
            let now = Utc::now();
            let messages = batch(n, now, Duration::minutes(age_minutes));
            let config = FragmenterConfig::default()
                .with_sample_rate(sample_rate)
                .with_min_fragment_size(min_size)
                .with_max_fragment_size(max_size);
            let frags = RandomSamplingFragmenter::at(now)
                .fragment(&messages, &config, &mut StdRng::seed_from_u64(seed));

            prop_assert_eq!(concat(&frags), messages);
            for frag in &frags {
                prop_assert!(!frag.is_empty());
                prop_assert_eq!(frag.metadata().count, frag.len());
            }
        }

        #[test]
        fn no_fragment_exceeds_max_size(
            n in 1usize..80,
            max_size in 1usize..10,
            seed in any::<u64>(),
        ) {
            let now = Utc::now();
            let config = FragmenterConfig::default()
                .with_sample_rate(0.05)
                .with_max_fragment_size(max_size);
            let frags = RandomSamplingFragmenter::at(now).fragment(
                &batch(n, now, Duration::zero()),
                &config,
                &mut StdRng::seed_from_u64(seed),
            );
            for frag in &frags {
                prop_assert!(frag.len() <= max_size);
            }
        }
    }
}
