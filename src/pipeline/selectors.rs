use crate::types::{FieldKey, Opponent, PlayerIdentity, PlayerRecord, TimeControl};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

// Sources whose offered candidates are remembered for alternates.
const OFFER_MEMORY: usize = 8;

/// What the crawler knows about the current cursor.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Record(&'a PlayerRecord),
    /// The fetch failed; only the identity is known.
    Identity(&'a PlayerIdentity),
}

impl<'a> Selection<'a> {
    pub fn identity(&self) -> &'a PlayerIdentity {
        match *self {
            Selection::Record(record) => record.identity(),
            Selection::Identity(identity) => identity,
        }
    }

    pub fn record(&self) -> Option<&'a PlayerRecord> {
        match *self {
            Selection::Record(record) => Some(record),
            Selection::Identity(_) => None,
        }
    }
}

/// Picks the next player to visit. Calling `next` again with the same input
/// yields a different candidate until the options run out.
pub trait PlayerSelector: Send {
    fn name(&self) -> String;

    /// Record fields this selector reads; checked against the fetchers when
    /// the crawler is built.
    fn required_fields(&self) -> Vec<FieldKey>;

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity>;
}

/// Remembers which candidates were already handed out per source player.
#[derive(Default)]
struct Offered {
    recent: VecDeque<(PlayerIdentity, HashSet<PlayerIdentity>)>,
}

impl Offered {
    fn for_source(&mut self, source: &PlayerIdentity) -> &mut HashSet<PlayerIdentity> {
        let position = match self.recent.iter().position(|(id, _)| id == source) {
            Some(position) => position,
            None => {
                if self.recent.len() == OFFER_MEMORY {
                    self.recent.pop_front();
                }
                self.recent.push_back((source.clone(), HashSet::new()));
                self.recent.len() - 1
            }
        };
        &mut self.recent[position].1
    }

    /// Opponents of `record` not yet offered, one entry per player keeping
    /// their best seen rating.
    fn fresh(&mut self, record: &PlayerRecord) -> Vec<Opponent> {
        let me = record.identity();
        let offered = self.for_source(me);
        let mut fresh: Vec<Opponent> = Vec::new();
        for opponent in record.opponents().unwrap_or_default() {
            if &opponent.identity == me || offered.contains(&opponent.identity) {
                continue;
            }
            match fresh.iter_mut().find(|o| o.identity == opponent.identity) {
                Some(seen) => seen.rating = seen.rating.max(opponent.rating),
                None => fresh.push(opponent.clone()),
            }
        }
        fresh
    }

    fn offer(&mut self, source: &PlayerIdentity, candidate: &PlayerIdentity) {
        self.for_source(source).insert(candidate.clone());
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn choose_random(rng: &mut StdRng, candidates: &[Opponent]) -> Option<PlayerIdentity> {
    candidates.choose(rng).map(|o| o.identity.clone())
}

fn choose_highest(candidates: &[Opponent]) -> Option<PlayerIdentity> {
    // first of equal ratings wins; unrated opponents come last
    candidates
        .iter()
        .rev()
        .max_by_key(|o| o.rating)
        .map(|o| o.identity.clone())
}

fn pick(
    offered: &mut Offered,
    current: Selection<'_>,
    choose: impl FnOnce(&PlayerRecord, Vec<Opponent>) -> Option<PlayerIdentity>,
) -> Option<PlayerIdentity> {
    let record = current.record()?;
    let fresh = offered.fresh(record);
    let chosen = choose(record, fresh)?;
    offered.offer(record.identity(), &chosen);
    Some(chosen)
}

pub struct RandomOpponentSelector {
    rng: StdRng,
    offered: Offered,
}

impl RandomOpponentSelector {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: rng_from(seed),
            offered: Offered::default(),
        }
    }
}

impl PlayerSelector for RandomOpponentSelector {
    fn name(&self) -> String {
        "random_opponent".into()
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents]
    }

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity> {
        let rng = &mut self.rng;
        pick(&mut self.offered, current, |_, fresh| choose_random(rng, &fresh))
    }
}

#[derive(Default)]
pub struct HighestRatedOpponentSelector {
    offered: Offered,
}

impl HighestRatedOpponentSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerSelector for HighestRatedOpponentSelector {
    fn name(&self) -> String {
        "highest_rated_opponent".into()
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents]
    }

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity> {
        pick(&mut self.offered, current, |_, fresh| choose_highest(&fresh))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Higher,
    Lower,
}

/// Random opponent rated strictly above (or below) the current player.
pub struct RandomRelativeRatedSelector {
    direction: Direction,
    time_control: TimeControl,
    rng: StdRng,
    offered: Offered,
}

impl RandomRelativeRatedSelector {
    pub fn higher(time_control: TimeControl, seed: Option<u64>) -> Self {
        Self::build(Direction::Higher, time_control, seed)
    }

    pub fn lower(time_control: TimeControl, seed: Option<u64>) -> Self {
        Self::build(Direction::Lower, time_control, seed)
    }

    fn build(direction: Direction, time_control: TimeControl, seed: Option<u64>) -> Self {
        Self {
            direction,
            time_control,
            rng: rng_from(seed),
            offered: Offered::default(),
        }
    }
}

impl PlayerSelector for RandomRelativeRatedSelector {
    fn name(&self) -> String {
        match self.direction {
            Direction::Higher => format!("random_higher_rated:{}", self.time_control),
            Direction::Lower => format!("random_lower_rated:{}", self.time_control),
        }
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents, FieldKey::Rating(self.time_control)]
    }

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity> {
        let (direction, tc, rng) = (self.direction, self.time_control, &mut self.rng);
        pick(&mut self.offered, current, |record, fresh| {
            // unrated players sit at the bottom of the ladder
            let own = record.rating(tc).unwrap_or(0);
            let eligible: Vec<Opponent> = fresh
                .into_iter()
                .filter(|o| match (direction, o.rating) {
                    (Direction::Higher, Some(r)) => r > own,
                    (Direction::Lower, Some(r)) => r < own,
                    (_, None) => false,
                })
                .collect();
            choose_random(rng, &eligible)
        })
    }
}

/// Climbs to the highest-rated opponent until the current player is rated
/// above `switch_rating`, then wanders randomly.
pub struct HighestUntilSwitchSelector {
    switch_rating: i64,
    time_control: TimeControl,
    switched: bool,
    highest: HighestRatedOpponentSelector,
    random: RandomOpponentSelector,
}

impl HighestUntilSwitchSelector {
    pub fn new(switch_rating: i64, time_control: TimeControl, seed: Option<u64>) -> Self {
        Self {
            switch_rating,
            time_control,
            switched: false,
            highest: HighestRatedOpponentSelector::new(),
            random: RandomOpponentSelector::new(seed),
        }
    }
}

impl PlayerSelector for HighestUntilSwitchSelector {
    fn name(&self) -> String {
        format!("highest_until_switch:{}", self.switch_rating)
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents, FieldKey::Rating(self.time_control)]
    }

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity> {
        if let Some(record) = current.record() {
            let rating = record.rating(self.time_control).unwrap_or(0);
            let switched = rating > self.switch_rating;
            if switched != self.switched {
                debug!("{} switching to {}", self.name(), if switched { "random" } else { "highest" });
            }
            self.switched = switched;
        }
        if self.switched {
            self.random.next(current)
        } else {
            self.highest.next(current)
        }
    }
}

/// Moves up through higher-rated opponents until a player above
/// `high_rating` is reached, then down until one below `low_rating`.
pub struct HigherLowerSelector {
    high_rating: i64,
    low_rating: i64,
    time_control: TimeControl,
    direction: Direction,
    higher: RandomRelativeRatedSelector,
    lower: RandomRelativeRatedSelector,
}

impl HigherLowerSelector {
    pub fn new(high_rating: i64, low_rating: i64, time_control: TimeControl, seed: Option<u64>) -> Self {
        Self {
            high_rating,
            low_rating,
            time_control,
            direction: Direction::Higher,
            higher: RandomRelativeRatedSelector::higher(time_control, seed),
            lower: RandomRelativeRatedSelector::lower(time_control, seed.map(|s| s.wrapping_add(1))),
        }
    }
}

impl PlayerSelector for HigherLowerSelector {
    fn name(&self) -> String {
        format!("higher_lower:{}-{}", self.low_rating, self.high_rating)
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents, FieldKey::Rating(self.time_control)]
    }

    fn next(&mut self, current: Selection<'_>) -> Option<PlayerIdentity> {
        if let Some(record) = current.record() {
            let rating = record.rating(self.time_control).unwrap_or(0);
            match self.direction {
                Direction::Higher if rating > self.high_rating => self.direction = Direction::Lower,
                Direction::Lower if rating < self.low_rating => self.direction = Direction::Higher,
                _ => {}
            }
        }
        match self.direction {
            Direction::Higher => self.higher.next(current),
            Direction::Lower => self.lower.next(current),
        }
    }
}

/// Walks a fixed list of players in order, regardless of the cursor.
pub struct ListSelector {
    remaining: VecDeque<PlayerIdentity>,
}

impl ListSelector {
    pub fn new(identities: impl IntoIterator<Item = PlayerIdentity>) -> Self {
        Self {
            remaining: identities.into_iter().collect(),
        }
    }

    /// Takes the first entry, for use as the crawl seed.
    pub fn take_first(&mut self) -> Option<PlayerIdentity> {
        self.remaining.pop_front()
    }
}

impl PlayerSelector for ListSelector {
    fn name(&self) -> String {
        "list".into()
    }

    fn required_fields(&self) -> Vec<FieldKey> {
        Vec::new()
    }

    fn next(&mut self, _current: Selection<'_>) -> Option<PlayerIdentity> {
        self.remaining.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldSet, FieldValue};

    fn id(name: &str) -> PlayerIdentity {
        PlayerIdentity::new(name).unwrap()
    }

    fn record(name: &str, rating: i64, opponents: &[(&str, i64)]) -> PlayerRecord {
        let opponents = opponents
            .iter()
            .map(|(n, r)| Opponent { identity: id(n), rating: Some(*r) })
            .collect();
        let mut record = PlayerRecord::new(id(name));
        record.merge(
            FieldSet::new()
                .with(FieldKey::Rating(TimeControl::Rapid), FieldValue::Int(rating))
                .with(FieldKey::Opponents, FieldValue::Opponents(opponents)),
        );
        record
    }

    #[test]
    fn highest_rated_yields_alternates_in_rating_order() {
        let r = record("me", 1500, &[("a", 1400), ("b", 1900), ("c", 1700), ("b", 1850)]);
        let mut selector = HighestRatedOpponentSelector::new();
        assert_eq!(selector.next(Selection::Record(&r)), Some(id("b")));
        assert_eq!(selector.next(Selection::Record(&r)), Some(id("c")));
        assert_eq!(selector.next(Selection::Record(&r)), Some(id("a")));
        assert_eq!(selector.next(Selection::Record(&r)), None);
    }

    #[test]
    fn random_opponent_is_reproducible_with_a_seed() {
        let r = record("me", 1500, &[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let picks = |seed| {
            let mut selector = RandomOpponentSelector::new(Some(seed));
            (0..4).map(|_| selector.next(Selection::Record(&r))).collect::<Vec<_>>()
        };
        let first = picks(7);
        assert_eq!(first, picks(7));
        let distinct: HashSet<_> = first.iter().flatten().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn no_relationship_data_gives_none() {
        let mut selector = RandomOpponentSelector::new(Some(1));
        let empty = record("me", 1500, &[]);
        assert_eq!(selector.next(Selection::Record(&empty)), None);
        assert_eq!(selector.next(Selection::Identity(&id("me"))), None);
    }

    #[test]
    fn relative_selectors_respect_own_rating() {
        let r = record("me", 1500, &[("weak", 1200), ("strong", 1800)]);
        let mut higher = RandomRelativeRatedSelector::higher(TimeControl::Rapid, Some(3));
        let mut lower = RandomRelativeRatedSelector::lower(TimeControl::Rapid, Some(3));
        assert_eq!(higher.next(Selection::Record(&r)), Some(id("strong")));
        assert_eq!(higher.next(Selection::Record(&r)), None);
        assert_eq!(lower.next(Selection::Record(&r)), Some(id("weak")));
    }

    #[test]
    fn unrated_player_counts_as_zero() {
        let mut unrated = PlayerRecord::new(id("new"));
        unrated.merge(FieldSet::new().with(
            FieldKey::Opponents,
            FieldValue::Opponents(vec![
                Opponent { identity: id("a"), rating: Some(1200) },
                Opponent { identity: id("b"), rating: None },
            ]),
        ));

        let mut higher = RandomRelativeRatedSelector::higher(TimeControl::Rapid, Some(2));
        assert_eq!(higher.next(Selection::Record(&unrated)), Some(id("a")));
        assert_eq!(higher.next(Selection::Record(&unrated)), None);

        let mut lower = RandomRelativeRatedSelector::lower(TimeControl::Rapid, Some(2));
        assert_eq!(lower.next(Selection::Record(&unrated)), None);

        let mut ladder = HigherLowerSelector::new(2400, 600, TimeControl::Rapid, Some(2));
        assert_eq!(ladder.next(Selection::Record(&unrated)), Some(id("a")));

        let mut climb = HighestUntilSwitchSelector::new(2400, TimeControl::Rapid, Some(2));
        assert_eq!(climb.next(Selection::Record(&unrated)), Some(id("a")));
        assert!(!climb.switched);
    }

    #[test]
    fn higher_lower_turns_around_at_the_thresholds() {
        let mut selector = HigherLowerSelector::new(2000, 1000, TimeControl::Rapid, Some(5));
        let low = record("low", 1500, &[("up", 1600), ("down", 1400)]);
        assert_eq!(selector.next(Selection::Record(&low)), Some(id("up")));

        let top = record("top", 2100, &[("up2", 2200), ("down2", 1900)]);
        assert_eq!(selector.next(Selection::Record(&top)), Some(id("down2")));

        // still heading down above the low threshold
        let mid = record("mid", 1500, &[("up3", 1600), ("down3", 1400)]);
        assert_eq!(selector.next(Selection::Record(&mid)), Some(id("down3")));
    }

    #[test]
    fn highest_until_switch_goes_random_above_threshold() {
        let mut selector = HighestUntilSwitchSelector::new(2400, TimeControl::Rapid, Some(11));
        let climbing = record("c", 2000, &[("x", 2100), ("y", 2300)]);
        assert_eq!(selector.next(Selection::Record(&climbing)), Some(id("y")));

        let top = record("t", 2500, &[("only", 1000)]);
        assert_eq!(selector.next(Selection::Record(&top)), Some(id("only")));
        assert!(selector.switched);
    }

    #[test]
    fn list_selector_walks_in_order() {
        let mut selector = ListSelector::new(vec![id("a"), id("b"), id("c")]);
        assert_eq!(selector.take_first(), Some(id("a")));
        assert_eq!(selector.next(Selection::Identity(&id("a"))), Some(id("b")));
        assert_eq!(selector.next(Selection::Identity(&id("b"))), Some(id("c")));
        assert_eq!(selector.next(Selection::Identity(&id("c"))), None);
        assert!(selector.required_fields().is_empty());
    }
}
