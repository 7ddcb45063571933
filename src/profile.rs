//! Call-tree view of a sampler's reports.
//!
//! A `Profile` keeps every distinct captured stack (innermost frame first) in a
//! radix trie, together with per-class sample counts, and the labels of the
//! frames it mentions.  Printing it yields an inverted call tree: allocation
//! sites at the root, their callers below.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    fmt::{Display, Formatter},
    fs,
    path::Path,
};

use num_format::{Locale, ToFormattedString};
use radix_trie::{iter::Children, SubTrie, Trie, TrieCommon, TrieKey};
use serde::{Deserialize, Serialize};

use crate::{
    host::{FrameResolver, Subscription},
    ClassId, FrameId, ProfileError, Sampler,
};

// Frame ids of a stack, innermost first.
type CallStack = Vec<u64>;

// For each call stack, track (class -> number of samples) map.
type ClassCounts = HashMap<u64, usize>;

#[derive(Clone, Debug)]
enum CallStackStats {
    Detailed(ClassCounts),
    // Aggregate number of samples.
    Summary(usize),
}

impl CallStackStats {
    fn new() -> Self {
        CallStackStats::Summary(0)
    }

    fn num_samples(&self) -> usize {
        match self {
            CallStackStats::Summary(samples) => *samples,
            CallStackStats::Detailed(counts) => counts.values().sum(),
        }
    }

    fn merge(&mut self, other: &CallStackStats) {
        *self = CallStackStats::Summary(self.num_samples() + other.num_samples());
    }

    fn format_totals<W: fmt::Write>(&self, total: usize, f: &mut W) -> Result<(), fmt::Error> {
        let samples = self.num_samples();
        write!(
            f,
            "{} samples ({:.1}%)",
            samples.to_formatted_string(&Locale::en),
            percent(samples, total)
        )
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * (part as f64) / (total as f64)
    }
}

/// Allocation profile that can be saved, merged with the profiles of other
/// threads and printed.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Profile {
    callstacks: Trie<CallStack, ClassCounts>,
    symbols: HashMap<u64, String>,
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.fmt_with_threshold(0.0, f)
    }
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the stacks captured by `sampler`, labelling frames with
    /// `resolver`.
    pub fn from_sampler<S, R>(sampler: &Sampler<S>, resolver: &R) -> Self
    where
        S: Subscription,
        R: FrameResolver + ?Sized,
    {
        let mut profile = Self::new();
        for sample in sampler.samples() {
            let callstack: CallStack = sample.frames.iter().map(|(frame, _)| frame.0).collect();
            profile.record(callstack, sample.class, sample.count);
        }
        for (frame, info) in sampler.frames(resolver) {
            profile.symbols.insert(frame.0, info.to_string());
        }
        profile
    }

    // Add `count` samples of `class` to `callstack`.
    fn record(&mut self, callstack: CallStack, class: ClassId, count: usize) {
        match self.callstacks.get_mut(&callstack) {
            Some(counts) => *counts.entry(class.0).or_insert(0) += count,
            None => {
                self.callstacks
                    .insert(callstack, std::iter::once((class.0, count)).collect());
            }
        }
    }

    /// Total number of samples in the profile.
    pub fn total_samples(&self) -> usize {
        self.callstacks
            .values()
            .map(|counts| counts.values().sum::<usize>())
            .sum()
    }

    /// Samples recorded for exactly this stack (innermost frame first), all
    /// classes included.
    pub fn samples_for(&self, callstack: &[FrameId]) -> usize {
        let key: CallStack = callstack.iter().map(|frame| frame.0).collect();
        self.callstacks
            .get(&key)
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }

    pub fn symbol(&self, frame: FrameId) -> Option<&str> {
        self.symbols.get(&frame.0).map(String::as_str)
    }

    // Use self.symbols to resolve a single frame in a stack trace.
    fn resolve_symbol(&self, frame: u64) -> String {
        self.symbols
            .get(&frame)
            .cloned()
            .unwrap_or_else(|| FrameId(frame).to_string())
    }

    // Merge two profiles.
    pub fn merge(&mut self, other: &Profile) {
        for (callstack, counts) in other.callstacks.iter() {
            match self.callstacks.get_mut(callstack) {
                None => {
                    self.callstacks.insert(callstack.clone(), counts.clone());
                }
                Some(old_counts) => {
                    Self::merge_counts(old_counts, counts);
                }
            }
        }

        for (frame, symbol) in other.symbols.iter() {
            if let Entry::Vacant(ve) = self.symbols.entry(*frame) {
                ve.insert(symbol.clone());
            }
        }
    }

    fn merge_counts(this: &mut ClassCounts, other: &ClassCounts) {
        for (class, cnt) in other.iter() {
            *this.entry(*class).or_insert(0) += *cnt;
        }
    }

    /// Write the profile as YAML to `path`, creating missing directories.
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let yaml = serde_yaml::to_string(self).map_err(ProfileError::Encode)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ProfileError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, yaml).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("wrote allocation profile to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let bytes = fs::read(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_slice(&bytes).map_err(|source| ProfileError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    fn summarize(&self) -> Trie<CallStack, CallStackStats> {
        let mut all_stacks = Trie::new();
        for (callstack, stats) in self.callstacks.iter() {
            all_stacks.insert(callstack.clone(), CallStackStats::Detailed(stats.clone()));
            for range in 1..callstack.len() {
                let prefix = Vec::from(&callstack.as_slice()[0..range]);
                if all_stacks.get(&prefix).is_none() {
                    all_stacks.insert(prefix, CallStackStats::new());
                }
            }
        }
        let mut summary = Trie::new();
        Self::aggregate_stats(&mut summary, &all_stacks);
        summary
    }

    // Scan the trie, store aggregate sample counts in each node
    fn aggregate_stats<'a, T: Clone + TrieCommon<'a, CallStack, CallStackStats>>(
        trie: &mut Trie<CallStack, CallStackStats>,
        node: T,
    ) -> CallStackStats {
        let mut stats = node
            .clone()
            .value()
            .cloned()
            .unwrap_or_else(CallStackStats::new);
        for child in node.clone().children() {
            let child_stats = Self::aggregate_stats(trie, &child);
            stats.merge(&child_stats);
        }
        if let Some(key) = node.key() {
            trie.insert(key.clone(), stats.clone());
        }
        stats
    }

    /// Print the call tree, folding subtrees with fewer than `threshold`
    /// percent of all samples into a single line.
    pub fn fmt_with_threshold<W: fmt::Write>(
        &self,
        threshold: f64,
        f: &mut W,
    ) -> Result<(), fmt::Error> {
        let summary = self.summarize();
        let total_samples: usize = trie_children_with_keys(&summary)
            .filter_map(|root| root.value().map(CallStackStats::num_samples))
            .sum();
        if total_samples == 0 {
            return f.write_str("no allocation samples");
        }
        self.format_summary(&summary, total_samples, threshold, "", f)
    }

    fn format_summary<'a, T: Clone + TrieCommon<'a, CallStack, CallStackStats>, W: fmt::Write>(
        &self,
        stats: T,
        total_samples: usize,
        threshold: f64,
        prefix: &str,
        f: &mut W,
    ) -> Result<(), fmt::Error> {
        if let (Some(key), Some(value)) = (stats.clone().key(), stats.clone().value()) {
            f.write_str("\n")?;
            f.write_str(prefix)?;
            f.write_str("->")?;
            value.format_totals(total_samples, f)?;
            f.write_str(": ")?;
            if let Some(frame) = key.last() {
                f.write_str(self.resolve_symbol(*frame).as_str())?;
            }
        }

        let mut children_sorted: Vec<_> = trie_children_with_keys(stats).collect();
        let nchildren = children_sorted.len();
        children_sorted.as_mut_slice().sort_by(|c1, c2| {
            let calls = |c: &SubTrie<'_, CallStack, CallStackStats>| {
                c.value().map(CallStackStats::num_samples).unwrap_or(0)
            };
            calls(c2).cmp(&calls(c1))
        });

        let mut below_threshold = 0;
        for (idx, child) in children_sorted.iter().enumerate() {
            let samples = child.value().map(CallStackStats::num_samples).unwrap_or(0);
            if percent(samples, total_samples) < threshold {
                below_threshold += samples;
                continue;
            }
            let child_prefix = if idx == nchildren - 1 {
                format!("{}  ", prefix)
            } else {
                format!("{} |", prefix)
            };
            self.format_summary(child, total_samples, threshold, child_prefix.as_str(), f)?;
        }

        if below_threshold > 0 {
            write!(
                f,
                "\n{}  ->{} samples in places below as_print threshold ({}%)",
                prefix,
                below_threshold.to_formatted_string(&Locale::en),
                threshold
            )?;
        }

        Ok(())
    }
}

// Iterate through the nearest descendants that have keys.
struct ChildrenWithKey<'a, K, V> {
    stack: Vec<Children<'a, K, V>>,
}

impl<'a, K, V> ChildrenWithKey<'a, K, V> {
    fn new<T>(trie: T) -> Self
    where
        T: TrieCommon<'a, K, V>,
        K: TrieKey,
    {
        ChildrenWithKey {
            stack: vec![trie.children()],
        }
    }
}

impl<'a, K, V> Iterator for ChildrenWithKey<'a, K, V>
where
    K: TrieKey,
{
    type Item = SubTrie<'a, K, V>;

    fn next(&mut self) -> Option<SubTrie<'a, K, V>> {
        loop {
            let child = match self.stack.last_mut()?.next() {
                Some(child) => child,
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            if child.key().is_some() {
                return Some(child);
            }
            self.stack.push(child.children());
        }
    }
}

fn trie_children_with_keys<'a, K, V, T>(trie: T) -> ChildrenWithKey<'a, K, V>
where
    T: Clone + TrieCommon<'a, K, V>,
    K: TrieKey,
{
    ChildrenWithKey::new(trie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{host::StackWalker, FrameInfo, LineNo};

    struct Fixed(Vec<Vec<u64>>, usize);

    impl StackWalker for Fixed {
        fn walk_stack(&mut self, _max: usize, frames: &mut Vec<FrameId>, lines: &mut Vec<LineNo>) {
            let stack = &self.0[self.1 % self.0.len()];
            self.1 += 1;
            frames.extend(stack.iter().map(|&f| FrameId(f)));
            lines.extend(std::iter::repeat(1).take(stack.len()));
        }
    }

    fn names(frame: FrameId) -> FrameInfo {
        let label = match frame.0 {
            1 => "d",
            2 => "c",
            3 => "b",
            4 => "a",
            _ => "main",
        };
        FrameInfo::new(label, None)
    }

    fn object(_: &()) -> Option<ClassId> {
        Some(ClassId(1))
    }

    // d is always called from c; c from b or main.
    fn profile() -> Profile {
        let mut sampler = Sampler::with_interval(1).unwrap();
        sampler.enable();
        let mut walker = Fixed(vec![vec![1, 2, 3, 4, 5], vec![1, 2, 5]], 0);
        for _ in 0..4 {
            sampler.on_allocation(&(), &object, &mut walker);
        }
        Profile::from_sampler(&sampler, &names)
    }

    #[test]
    fn builds_from_sampler() {
        let profile = profile();
        assert_eq!(profile.total_samples(), 4);
        assert_eq!(profile.samples_for(&[FrameId(1), FrameId(2), FrameId(5)]), 2);
        assert_eq!(profile.samples_for(&[FrameId(1)]), 0);
        assert_eq!(profile.symbol(FrameId(3)), Some("b"));
    }

    #[test]
    fn prints_inverted_call_tree() {
        let text = profile().to_string();
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines[0], "  ->4 samples (100.0%): d");
        assert_eq!(lines[1], "    ->4 samples (100.0%): c");
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().any(|l| l.ends_with("2 samples (50.0%): b")));
    }

    #[test]
    fn threshold_folds_small_subtrees() {
        let mut out = String::new();
        profile().fmt_with_threshold(60.0, &mut out).unwrap();
        assert!(out.contains("->4 samples in places below as_print threshold (60%)"));
        assert!(!out.contains(": b"));
    }

    #[test]
    fn merge_adds_counts() {
        let mut merged = profile();
        merged.merge(&profile());
        assert_eq!(merged.total_samples(), 8);
        assert_eq!(merged.samples_for(&[FrameId(1), FrameId(2), FrameId(3), FrameId(4), FrameId(5)]), 4);
        assert_eq!(merged.symbol(FrameId(1)), Some("d"));
    }

    #[test]
    fn empty_profile_prints_placeholder() {
        assert_eq!(Profile::new().to_string(), "no allocation samples");
    }

    #[test]
    fn yaml_round_trip() {
        let profile = profile();
        let dir = std::env::temp_dir().join(format!("alloc_sampler_profile_{}", std::process::id()));
        let path = dir.join("profile.yaml");
        profile.save(&path).unwrap();
        let loaded = Profile::load(&path).unwrap();
        assert_eq!(loaded.total_samples(), profile.total_samples());
        assert_eq!(loaded.symbol(FrameId(2)), Some("c"));
        fs::remove_dir_all(dir).unwrap();
    }
}
