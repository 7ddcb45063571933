//! Per-site summary: how many samples each class got at each source line.

use std::collections::BTreeMap;

use crate::{catalog::FrameCatalog, group::StackSample, ClassId, LineNo};

/// Path reported for frames the resolver could not place in a file.
pub const UNKNOWN_PATH: &str = "<unknown>";

/// class -> source path -> line -> samples.
pub type AllocationSites = BTreeMap<ClassId, BTreeMap<String, BTreeMap<LineNo, usize>>>;

/// Attribute every sample to the innermost frame of its stack.
pub fn allocation_sites(samples: &[StackSample], catalog: &FrameCatalog) -> AllocationSites {
    let mut sites = AllocationSites::new();
    for sample in samples {
        let (frame, line) = match sample.top() {
            Some(top) => top,
            None => continue,
        };
        let path = catalog
            .get(&frame)
            .and_then(|info| info.path.clone())
            .unwrap_or_else(|| UNKNOWN_PATH.to_string());
        *sites
            .entry(sample.class)
            .or_default()
            .entry(path)
            .or_default()
            .entry(line)
            .or_default() += sample.count;
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameId, FrameInfo};

    fn sample(class: u64, count: usize, frames: &[(u64, LineNo)]) -> StackSample {
        StackSample {
            class: ClassId(class),
            count,
            frames: frames.iter().map(|&(f, l)| (FrameId(f), l)).collect(),
        }
    }

    #[test]
    fn sums_by_class_file_and_line() {
        let mut catalog = FrameCatalog::new();
        catalog.insert(FrameId(1), FrameInfo::new("block in <main>", Some("<compiled>".into())));
        catalog.insert(FrameId(2), FrameInfo::new("<main>", Some("<compiled>".into())));
        catalog.insert(FrameId(3), FrameInfo::new("Integer#times", None));

        let samples = vec![
            // Same line reached through different callers.
            sample(7, 6, &[(1, 1), (3, 0), (2, 1)]),
            sample(7, 4, &[(1, 1), (2, 1)]),
            sample(7, 1, &[(2, 2)]),
            sample(8, 2, &[(3, 0), (2, 5)]),
        ];

        let sites = allocation_sites(&samples, &catalog);

        let object = &sites[&ClassId(7)]["<compiled>"];
        assert_eq!(object.get(&1), Some(&10));
        assert_eq!(object.get(&2), Some(&1));
        assert_eq!(sites[&ClassId(8)][UNKNOWN_PATH].get(&0), Some(&2));
    }

    #[test]
    fn no_samples_no_sites() {
        assert!(allocation_sites(&[], &FrameCatalog::new()).is_empty());
    }
}
