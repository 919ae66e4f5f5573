//! Picks background clips with no repeated asset and, wherever the pool
//! allows it, no two neighbours from the same category.

use crate::error::{VideoError, VideoResult};
use crate::inventory::AssetCatalog;
use crate::logi;
use rand::Rng;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub category: String,
    pub path: PathBuf,
}

/// Ordered, duplicate-free clip selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPlan {
    entries: Vec<PlanEntry>,
}

impl SelectionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.path.as_path())
    }

    /// Positions where an entry shares its category with the one before it.
    pub fn adjacent_repeats(&self) -> usize {
        self.entries
            .windows(2)
            .filter(|w| w[0].category == w[1].category)
            .count()
    }
}

pub fn pick_non_repeating(catalog: &AssetCatalog, count: usize) -> VideoResult<SelectionPlan> {
    pick_non_repeating_with(catalog, count, &mut rand::thread_rng())
}

/// Same as [`pick_non_repeating`] with a caller-supplied random source.
///
/// The pool is shuffled once and split into per-category queues that keep the
/// shuffled order. Each step takes the earliest queued asset whose category
/// differs from the previous entry, provided the rest of the plan can still be
/// completed without repeats. When that is already impossible the most
/// populous other category is drained first, and only when the previous
/// category is the sole one left does a repeat happen.
pub fn pick_non_repeating_with<R: Rng + ?Sized>(
    catalog: &AssetCatalog,
    count: usize,
    rng: &mut R,
) -> VideoResult<SelectionPlan> {
    let available = catalog.distinct_assets();
    if count > available {
        return Err(VideoError::InsufficientAssets {
            requested: count,
            available,
        });
    }

    let names: Vec<&str> = catalog.iter().map(|(name, _)| name).collect();
    let mut pool: Vec<(usize, &Path)> = catalog
        .iter()
        .enumerate()
        .flat_map(|(ci, (_, assets))| assets.iter().map(move |p| (ci, p.as_path())))
        .collect();
    pool.shuffle(rng);

    let mut queues: Vec<VecDeque<(usize, &Path)>> = vec![VecDeque::new(); names.len()];
    for (pos, (ci, path)) in pool.into_iter().enumerate() {
        queues[ci].push_back((pos, path));
    }

    let mut used: HashSet<&Path> = HashSet::with_capacity(count);
    let mut entries = Vec::with_capacity(count);
    let mut last: Option<usize> = None;

    while entries.len() < count {
        for queue in queues.iter_mut() {
            while queue.front().is_some_and(|(_, p)| used.contains(p)) {
                queue.pop_front();
            }
        }

        let Some(choice) = next_category(&queues, last, count - entries.len()) else {
            debug_assert!(false, "pool ran dry after the size check");
            return Err(VideoError::InsufficientAssets {
                requested: count,
                available,
            });
        };

        if last == Some(choice) {
            logi(format!(
                "Only '{}' clips remain; allowing a repeat at position {}",
                names[choice],
                entries.len() + 1
            ));
        }

        if let Some((_, path)) = queues[choice].pop_front() {
            used.insert(path);
            entries.push(PlanEntry {
                category: names[choice].to_string(),
                path: path.to_path_buf(),
            });
            last = Some(choice);
        }
    }

    Ok(SelectionPlan { entries })
}

fn next_category(
    queues: &[VecDeque<(usize, &Path)>],
    last: Option<usize>,
    picks_left: usize,
) -> Option<usize> {
    let lens: Vec<usize> = queues.iter().map(VecDeque::len).collect();
    let mut candidates: Vec<usize> = (0..queues.len())
        .filter(|&c| lens[c] > 0 && Some(c) != last)
        .collect();

    if candidates.is_empty() {
        return (0..queues.len()).find(|&c| lens[c] > 0);
    }

    candidates.sort_by_key(|&c| queues[c][0].0);

    if completes_without_repeat(&lens, last, picks_left) {
        let mut after = lens.clone();
        let found = candidates.iter().copied().find(|&c| {
            after[c] -= 1;
            let ok = completes_without_repeat(&after, Some(c), picks_left - 1);
            after[c] += 1;
            ok
        });
        return found.or(Some(candidates[0]));
    }

    candidates
        .iter()
        .copied()
        .max_by_key(|&c| (lens[c], Reverse(queues[c][0].0)))
}

/// Whether `picks` more entries can follow `last` with no two neighbours
/// sharing a category. A category may fill at most every other slot, and the
/// previous category loses the first one.
fn completes_without_repeat(lens: &[usize], last: Option<usize>, picks: usize) -> bool {
    if picks == 0 {
        return true;
    }
    let usable: usize = lens
        .iter()
        .enumerate()
        .map(|(c, &len)| {
            let cap = if Some(c) == last { picks / 2 } else { picks.div_ceil(2) };
            len.min(cap)
        })
        .sum();
    usable >= picks
}
