//! Stack detection.
//!
//! For every jpg-only stem (a stacked-output candidate) walk the sequence backwards and
//! collect the raw frames the camera most plausibly consumed:
//! - numbers must be strictly consecutive and not already claimed by another stack;
//! - the first input must lie within `max_output_lag` of the output (processing delay),
//!   each further input within `max_input_gap` of the previous one (shutter cadence);
//! - at most `max_inputs` frames; when that cap is hit, a short probe past the oldest
//!   frame rejects long focus-bracketing bursts that merely end like a stack.
//!
//! Candidates are evaluated in descending numeric order per prefix and accepted inputs are
//! claimed immediately, so a frame is never bound to two stacks. Detection is strictly
//! single-threaded: [`FileRef`] time memoization and the [`ClaimSet`] rely on it.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

use crate::index::{FileIndex, FileRecord, FileRef, SeqEntry, SequenceIndex};

/// Hard bounds on the number of inputs a stack may have; policies may only narrow them.
pub const MIN_STACK_INPUTS: usize = 3;
pub const MAX_STACK_INPUTS: usize = 15;

/// Thresholds for the detection walk.
#[derive(Debug, Clone, PartialEq)]
pub struct StackPolicy {
    /// Allowed gap between the output and its nearest input.
    pub max_output_lag: Duration,
    /// Allowed gap between two consecutive inputs.
    pub max_input_gap: Duration,
    /// Burst probe: frames this close to the oldest input count as the same burst.
    pub max_burst_gap: Duration,
    pub min_inputs: usize,
    pub max_inputs: usize,
    /// How many frames past the oldest input the burst probe looks at.
    pub burst_probe: usize,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self {
            max_output_lag: Duration::from_secs(120),
            max_input_gap: Duration::from_secs(6),
            max_burst_gap: Duration::from_secs_f64(2.0),
            min_inputs: MIN_STACK_INPUTS,
            max_inputs: MAX_STACK_INPUTS,
            burst_probe: 3,
        }
    }
}

/// Why the backward walk stopped collecting inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NumberGap,
    AlreadyClaimed,
    Unreadable,
    TimeGap,
    SequenceStart,
    Cap,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::NumberGap => "number-gap",
            StopReason::AlreadyClaimed => "already-claimed",
            StopReason::Unreadable => "unreadable",
            StopReason::TimeGap => "time-gap",
            StopReason::SequenceStart => "sequence-start",
            StopReason::Cap => "cap",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotJpgOnly,
    NoNumericIdentity,
    UnresolvableOutputTime,
    FirstInSequence,
    OversizedBurst,
    TooFewInputs { found: usize, stop: StopReason },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotJpgOnly => f.write_str("not-jpg-only"),
            RejectReason::NoNumericIdentity => f.write_str("no-numeric-identity"),
            RejectReason::UnresolvableOutputTime => f.write_str("unresolvable-output-time"),
            RejectReason::FirstInSequence => f.write_str("first-in-sequence"),
            RejectReason::OversizedBurst => f.write_str("oversized-burst"),
            RejectReason::TooFewInputs { found, stop } => {
                write!(f, "too-few-inputs ({found}, stopped at {stop})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected(RejectReason),
}

/// Result of evaluating one output candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCandidate {
    pub output_stem: String,
    /// Nearest-to-output first.
    pub input_stems: Vec<String>,
    pub outcome: Outcome,
}

impl StackCandidate {
    fn rejected(output_stem: &str, inputs: Vec<String>, reason: RejectReason) -> Self {
        Self {
            output_stem: output_stem.to_string(),
            input_stems: inputs,
            outcome: Outcome::Rejected(reason),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted)
    }
}

/// Stems already bound to an accepted stack.
#[derive(Debug, Default, Clone)]
pub struct ClaimSet {
    stems: HashSet<String>,
}

impl ClaimSet {
    pub fn contains(&self, stem: &str) -> bool {
        self.stems.contains(stem)
    }

    fn claim_all(&mut self, stems: &[String]) {
        for s in stems {
            let fresh = self.stems.insert(s.clone());
            debug_assert!(fresh, "stem claimed twice: {s}");
        }
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}

/// All decisions from one detection pass.
#[derive(Debug, Default)]
pub struct Detection {
    pub accepted: Vec<StackCandidate>,
    pub rejected: Vec<StackCandidate>,
    pub claims: ClaimSet,
}

fn abs_gap(a: SystemTime, b: SystemTime) -> Duration {
    a.duration_since(b).unwrap_or_else(|e| e.duration())
}

pub struct StackDetector<'a> {
    index: &'a FileIndex,
    seq: &'a SequenceIndex,
    policy: StackPolicy,
}

impl<'a> StackDetector<'a> {
    pub fn new(index: &'a FileIndex, seq: &'a SequenceIndex, policy: StackPolicy) -> Self {
        Self { index, seq, policy }
    }

    pub fn policy(&self) -> &StackPolicy {
        &self.policy
    }

    /// Output candidates in evaluation order: per prefix (sorted), descending number; then
    /// unnumbered jpg-only stems by name so they are reported too.
    pub fn candidate_order(&self) -> Vec<&'a str> {
        let mut order: Vec<&'a str> = Vec::new();
        for prefix in self.seq.prefixes() {
            for entry in self.seq.entries(prefix).iter().rev() {
                if self.index.get(&entry.stem).is_some_and(FileRecord::is_jpg_only) {
                    order.push(entry.stem.as_str());
                }
            }
        }
        let mut unnumbered: Vec<&'a str> = self
            .index
            .records()
            .iter()
            .filter(|r| r.is_jpg_only() && r.numeric_identity.is_none())
            .map(|r| r.stem.as_str())
            .collect();
        unnumbered.sort_unstable();
        order.extend(unnumbered);
        order
    }

    /// Evaluate one candidate against the current claims. Does not claim anything.
    pub fn evaluate(&self, output_stem: &str, claims: &ClaimSet) -> StackCandidate {
        let Some(rec) = self.index.get(output_stem) else {
            return StackCandidate::rejected(output_stem, Vec::new(), RejectReason::NoNumericIdentity);
        };
        let stem = rec.stem.as_str();
        if rec.raw.is_some() {
            return StackCandidate::rejected(stem, Vec::new(), RejectReason::NotJpgOnly);
        }
        let (Some(jpg), Some(id)) = (rec.jpg.as_ref(), rec.numeric_identity.as_ref()) else {
            return StackCandidate::rejected(stem, Vec::new(), RejectReason::NoNumericIdentity);
        };
        let Some(out_time) = jpg.mtime() else {
            return StackCandidate::rejected(stem, Vec::new(), RejectReason::UnresolvableOutputTime);
        };
        let entries = self.seq.entries(&id.prefix);
        let Some(start) = self.seq.predecessor_position(&id.prefix, id.number) else {
            return StackCandidate::rejected(stem, Vec::new(), RejectReason::FirstInSequence);
        };

        let walk = self.walk_back(entries, start, id.number, out_time, claims);
        trace!(stem, inputs = walk.inputs.len(), stop = %walk.stop, "walk finished");

        if walk.stop == StopReason::Cap
            && self.burst_continues(entries, walk.oldest_pos, walk.oldest_time)
        {
            return StackCandidate::rejected(stem, walk.inputs, RejectReason::OversizedBurst);
        }

        let found = walk.inputs.len();
        if found < self.policy.min_inputs || found > self.policy.max_inputs {
            return StackCandidate::rejected(
                stem,
                walk.inputs,
                RejectReason::TooFewInputs {
                    found,
                    stop: walk.stop,
                },
            );
        }

        StackCandidate {
            output_stem: stem.to_string(),
            input_stems: walk.inputs,
            outcome: Outcome::Accepted,
        }
    }

    fn walk_back(
        &self,
        entries: &[SeqEntry],
        start: usize,
        output_number: u64,
        out_time: SystemTime,
        claims: &ClaimSet,
    ) -> Walk {
        let mut inputs = Vec::new();
        let mut expected = output_number.checked_sub(1);
        let mut prev_time = out_time;
        let mut pos = start;

        let stop = loop {
            let entry = &entries[pos];
            if Some(entry.number) != expected {
                break StopReason::NumberGap;
            }
            if claims.contains(&entry.stem) {
                break StopReason::AlreadyClaimed;
            }
            let Some(t) = self.index.raw_time(&entry.stem) else {
                break StopReason::Unreadable;
            };
            let limit = if inputs.is_empty() {
                self.policy.max_output_lag
            } else {
                self.policy.max_input_gap
            };
            if abs_gap(prev_time, t) > limit {
                break StopReason::TimeGap;
            }

            inputs.push(entry.stem.clone());
            prev_time = t;
            if inputs.len() >= self.policy.max_inputs {
                break StopReason::Cap;
            }
            if pos == 0 {
                break StopReason::SequenceStart;
            }
            pos -= 1;
            expected = entry.number.checked_sub(1);
        };

        // When the loop stopped on the entry at `pos` without accepting it, the oldest
        // accepted input sits one position higher.
        let oldest_pos = if matches!(stop, StopReason::Cap | StopReason::SequenceStart) {
            pos
        } else {
            pos + 1
        };
        Walk {
            inputs,
            stop,
            oldest_pos,
            oldest_time: prev_time,
        }
    }

    /// True when the frames just before the oldest input continue the burst: every probed
    /// frame is consecutive and within `max_burst_gap` of the oldest input. Needs at least
    /// one frame to probe.
    fn burst_continues(&self, entries: &[SeqEntry], oldest_pos: usize, oldest_time: SystemTime) -> bool {
        let mut expected = entries[oldest_pos].number;
        let mut probed = 0usize;
        for entry in entries[..oldest_pos].iter().rev().take(self.policy.burst_probe) {
            expected = match expected.checked_sub(1) {
                Some(e) => e,
                None => return false,
            };
            if entry.number != expected {
                return false;
            }
            match self.index.raw_time(&entry.stem) {
                Some(t) if abs_gap(oldest_time, t) <= self.policy.max_burst_gap => probed += 1,
                _ => return false,
            }
        }
        probed > 0
    }

    /// Evaluate every candidate in order, claiming inputs of accepted stacks as they are
    /// decided. `filter` scopes which outputs are considered (e.g. by date); `on_decision`
    /// sees each candidate right after its decision and claims are recorded.
    pub fn detect_each(
        &self,
        claims: &mut ClaimSet,
        filter: &dyn Fn(&FileRef) -> bool,
        mut on_decision: impl FnMut(&StackCandidate),
    ) {
        for stem in self.candidate_order() {
            if claims.contains(stem) {
                continue;
            }
            let in_scope = self
                .index
                .get(stem)
                .and_then(|r| r.jpg.as_ref())
                .is_some_and(|j| filter(j));
            if !in_scope {
                continue;
            }
            let cand = self.evaluate(stem, claims);
            match cand.outcome {
                Outcome::Accepted => {
                    claims.claim_all(&cand.input_stems);
                    info!(output = %cand.output_stem, inputs = cand.input_stems.len(), "Accepted stack");
                }
                Outcome::Rejected(reason) => {
                    debug!(output = %cand.output_stem, %reason, "Rejected candidate");
                }
            }
            on_decision(&cand);
        }
    }

    /// Run a full pass with a fresh claim set and collect every decision.
    pub fn detect_all(&self, filter: &dyn Fn(&FileRef) -> bool) -> Detection {
        let mut claims = ClaimSet::default();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        self.detect_each(&mut claims, filter, |c| {
            if c.is_accepted() {
                accepted.push(c.clone());
            } else {
                rejected.push(c.clone());
            }
        });
        Detection {
            accepted,
            rejected,
            claims,
        }
    }
}

struct Walk {
    inputs: Vec<String>,
    stop: StopReason,
    oldest_pos: usize,
    oldest_time: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const T0: u64 = 1_700_000_000;

    fn at(secs: f64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(T0) + Duration::from_secs_f64(secs)
    }

    /// Build an index where each entry is (name, mtime offset in seconds or None).
    fn index(files: &[(&str, Option<f64>)]) -> FileIndex {
        let mut idx =
            FileIndex::from_paths("/d", files.iter().map(|(n, _)| PathBuf::from(format!("/d/{n}"))));
        for (name, t) in files {
            let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
            let rec = idx.get_mut(stem).unwrap();
            for f in rec.files_mut() {
                if f.basename() == *name {
                    *f = FileRef::with_known_mtime(f.path().to_path_buf(), t.map(at));
                }
            }
        }
        idx
    }

    fn all(_: &FileRef) -> bool {
        true
    }

    fn detect(files: &[(&str, Option<f64>)]) -> Detection {
        let idx = index(files);
        let seq = SequenceIndex::build(&idx);
        StackDetector::new(&idx, &seq, StackPolicy::default()).detect_all(&all)
    }

    fn raws(first: u64, times: &[f64]) -> Vec<(String, Option<f64>)> {
        times
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("P{:07}.ORF", first + i as u64), Some(*t)))
            .collect()
    }

    fn with_output(mut frames: Vec<(String, Option<f64>)>, number: u64, t: f64) -> Vec<(String, Option<f64>)> {
        frames.push((format!("P{number:07}.JPG"), Some(t)));
        frames
    }

    fn borrow(v: &[(String, Option<f64>)]) -> Vec<(&str, Option<f64>)> {
        v.iter().map(|(n, t)| (n.as_str(), *t)).collect()
    }

    #[test]
    fn accepts_gap_chain_within_lag_then_burst_cadence() {
        // output at 100; inputs 90s, 93s, 96s before it
        let files = with_output(raws(1, &[4.0, 7.0, 10.0]), 4, 100.0);
        let d = detect(&borrow(&files));
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(
            d.accepted[0].input_stems,
            vec!["P0000003", "P0000002", "P0000001"]
        );
    }

    #[test]
    fn inter_input_gap_truncates_the_walk() {
        // gaps 90, 3, 8: the third input is too far from the second
        let files = with_output(raws(1, &[9.0, 17.0, 20.0]), 4, 110.0);
        let d = detect(&borrow(&files));
        assert!(d.accepted.is_empty());
        let r = &d.rejected[0];
        assert_eq!(r.input_stems.len(), 2);
        assert_eq!(
            r.outcome,
            Outcome::Rejected(RejectReason::TooFewInputs {
                found: 2,
                stop: StopReason::TimeGap
            })
        );
    }

    #[test]
    fn gap_violation_keeps_what_accumulated() {
        // five inputs at 1s cadence, then a 10s hole before older frames
        let files = with_output(raws(1, &[0.0, 20.0, 21.0, 22.0, 23.0, 24.0]), 7, 30.0);
        let d = detect(&borrow(&files));
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(d.accepted[0].input_stems.len(), 5);
        assert!(!d.accepted[0].input_stems.contains(&"P0000001".to_string()));
    }

    #[test]
    fn output_lag_is_checked_against_first_input_only() {
        let files = with_output(raws(1, &[0.0, 1.0, 2.0]), 4, 200.0);
        let d = detect(&borrow(&files));
        assert_eq!(
            d.rejected[0].outcome,
            Outcome::Rejected(RejectReason::TooFewInputs {
                found: 0,
                stop: StopReason::TimeGap
            })
        );
    }

    #[test]
    fn twenty_frame_burst_is_rejected() {
        let times: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let files = with_output(raws(1, &times), 21, 15.0);
        let d = detect(&borrow(&files));
        assert!(d.accepted.is_empty());
        assert_eq!(d.rejected[0].outcome, Outcome::Rejected(RejectReason::OversizedBurst));
        assert!(d.claims.is_empty());
    }

    #[test]
    fn exactly_fifteen_frames_at_sequence_start_is_accepted() {
        let times: Vec<f64> = (0..15).map(|i| i as f64 * 0.5).collect();
        let files = with_output(raws(1, &times), 16, 12.0);
        let d = detect(&borrow(&files));
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(d.accepted[0].input_stems.len(), 15);
    }

    #[test]
    fn cap_without_burst_continuation_is_accepted() {
        // 18 frames; the 3 oldest are 3s apart from the rest, outside the burst gap
        let mut times = vec![0.0, 3.0, 6.0];
        times.extend((0..15).map(|i| 9.0 + i as f64 * 0.5));
        let files = with_output(raws(1, &times), 19, 20.0);
        let d = detect(&borrow(&files));
        // known boundary: a longer run passes when its probe frames are not rapid
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(d.accepted[0].input_stems.len(), 15);
        assert_eq!(d.accepted[0].input_stems.last().unwrap(), "P0000004");
    }

    #[test]
    fn number_gap_stops_and_first_in_sequence_rejects() {
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.ORF", Some(1.0)),
            ("P0000004.ORF", Some(2.0)),
            ("P0000005.JPG", Some(5.0)),
            ("Q0000001.JPG", Some(5.0)),
        ];
        let d = detect(&files);
        assert!(d.accepted.is_empty());
        let by_stem = |s: &str| d.rejected.iter().find(|c| c.output_stem == s).unwrap().outcome;
        assert_eq!(
            by_stem("P0000005"),
            Outcome::Rejected(RejectReason::TooFewInputs {
                found: 1,
                stop: StopReason::NumberGap
            })
        );
        assert_eq!(by_stem("Q0000001"), Outcome::Rejected(RejectReason::FirstInSequence));
    }

    #[test]
    fn unreadable_input_stops_the_walk() {
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.ORF", None),
            ("P0000003.ORF", Some(2.0)),
            ("P0000004.ORF", Some(3.0)),
            ("P0000005.JPG", Some(5.0)),
        ];
        let d = detect(&files);
        assert_eq!(
            d.rejected[0].outcome,
            Outcome::Rejected(RejectReason::TooFewInputs {
                found: 2,
                stop: StopReason::Unreadable
            })
        );
    }

    #[test]
    fn output_without_time_or_identity_is_rejected() {
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.JPG", None),
            ("holiday.jpg", Some(0.0)),
        ];
        let d = detect(&files);
        let reasons: Vec<_> = d.rejected.iter().map(|c| c.outcome).collect();
        assert_eq!(
            reasons,
            vec![
                Outcome::Rejected(RejectReason::UnresolvableOutputTime),
                Outcome::Rejected(RejectReason::NoNumericIdentity),
            ]
        );
    }

    #[test]
    fn larger_output_claims_first_and_blocks_reuse() {
        // frames 1..3 feed output 4; frames 5..7 feed output 8. Output 4 sits in the
        // middle but is jpg-only, so output 8's walk stops at it.
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.ORF", Some(1.0)),
            ("P0000003.ORF", Some(2.0)),
            ("P0000004.JPG", Some(10.0)),
            ("P0000005.ORF", Some(11.0)),
            ("P0000006.ORF", Some(12.0)),
            ("P0000007.ORF", Some(13.0)),
            ("P0000008.JPG", Some(20.0)),
        ];
        let d = detect(&files);
        assert_eq!(d.accepted.len(), 2);
        assert_eq!(d.accepted[0].output_stem, "P0000008");
        assert_eq!(d.accepted[1].output_stem, "P0000004");
        let mut seen = HashSet::new();
        for c in &d.accepted {
            for s in &c.input_stems {
                assert!(seen.insert(s.clone()), "{s} claimed twice");
            }
        }
        assert_eq!(d.claims.len(), 6);
    }

    #[test]
    fn claimed_stems_stop_later_walks() {
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.ORF", Some(1.0)),
            ("P0000003.ORF", Some(2.0)),
            ("P0000004.JPG", Some(3.0)),
        ];
        let idx = index(&files);
        let seq = SequenceIndex::build(&idx);
        let det = StackDetector::new(&idx, &seq, StackPolicy::default());
        let mut claims = ClaimSet::default();
        claims.claim_all(&["P0000002".to_string()]);
        let c = det.evaluate("P0000004", &claims);
        assert_eq!(
            c.outcome,
            Outcome::Rejected(RejectReason::TooFewInputs {
                found: 1,
                stop: StopReason::AlreadyClaimed
            })
        );
    }

    #[test]
    fn filter_scopes_candidates() {
        let files = with_output(raws(1, &[0.0, 1.0, 2.0]), 4, 5.0);
        let idx = index(&borrow(&files));
        let seq = SequenceIndex::build(&idx);
        let det = StackDetector::new(&idx, &seq, StackPolicy::default());
        let none = det.detect_all(&|_: &FileRef| false);
        assert!(none.accepted.is_empty() && none.rejected.is_empty());
    }

    #[test]
    fn tagged_output_is_still_an_anchor() {
        let files = vec![
            ("P0000001.ORF", Some(0.0)),
            ("P0000002.ORF", Some(1.0)),
            ("P0000003.ORF", Some(2.0)),
            ("P0000004 stacked.JPG", Some(5.0)),
        ];
        let d = detect(&files);
        assert_eq!(d.accepted.len(), 1);
        assert_eq!(d.accepted[0].output_stem, "P0000004 stacked");
    }

    #[test]
    fn detection_is_repeatable() {
        let files = with_output(raws(1, &[0.0, 1.0, 2.0, 3.0]), 5, 8.0);
        let idx = index(&borrow(&files));
        let seq = SequenceIndex::build(&idx);
        let det = StackDetector::new(&idx, &seq, StackPolicy::default());
        let a = det.detect_all(&all);
        let b = det.detect_all(&all);
        assert_eq!(a.accepted, b.accepted);
        assert_eq!(a.rejected, b.rejected);
    }
}
