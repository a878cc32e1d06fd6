//! Generation-checked arena of open sources.
//!
//! A [`SourceId`] is an index plus the generation of the slot when the
//! source was inserted. Closing a source bumps the slot's generation, so
//! every copy of the old id goes stale: lookups return `None` and a second
//! `close` is a no-op returning `false`. Freed slots are reused.

use crate::cascade::DecoderBackends;
use crate::options::OpenOptions;
use crate::source::VideoSource;
use crate::video::VideoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId {
    index: u32,
    generation: u32,
}

impl SourceId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Entry {
    generation: u32,
    source: Option<VideoSource>,
}

/// Lifetime counters for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub opened: u64,
    pub closed: u64,
    pub live: usize,
    pub peak_live: usize,
}

#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<Entry>,
    free: Vec<u32>,
    stats: RegistryStats,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` and stores the source.
    pub fn open(
        &mut self,
        path: &str,
        options: OpenOptions,
        backends: &dyn DecoderBackends,
    ) -> Result<SourceId, VideoError> {
        let source = VideoSource::open_with(path, options, backends)?;
        Ok(self.insert(source))
    }

    pub fn insert(&mut self, source: VideoSource) -> SourceId {
        let id = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.source = Some(source);
                SourceId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    source: Some(source),
                });
                SourceId {
                    index,
                    generation: 0,
                }
            }
        };

        self.stats.opened += 1;
        self.stats.live += 1;
        self.stats.peak_live = self.stats.peak_live.max(self.stats.live);
        id
    }

    pub fn get(&self, id: SourceId) -> Option<&VideoSource> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.source.as_ref())
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut VideoSource> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.source.as_mut())
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.get(id).is_some()
    }

    /// Closes and removes the source. Returns `false` for a stale or unknown id.
    pub fn close(&mut self, id: SourceId) -> bool {
        let Some(entry) = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
        else {
            tracing::debug!("Ignoring close of stale source {}", id);
            return false;
        };
        let Some(mut source) = entry.source.take() else {
            return false;
        };

        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.stats.closed += 1;
        self.stats.live -= 1;

        source.close();
        true
    }

    /// Closes every live source.
    pub fn close_all(&mut self) {
        let ids: Vec<SourceId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.close(id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &VideoSource)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| {
            e.source.as_ref().map(|s| {
                (
                    SourceId {
                        index: index as u32,
                        generation: e.generation,
                    },
                    s,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SourceId, &mut VideoSource)> {
        self.entries.iter_mut().enumerate().filter_map(|(index, e)| {
            let generation = e.generation;
            e.source.as_mut().map(|s| {
                (
                    SourceId {
                        index: index as u32,
                        generation,
                    },
                    s,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.stats.live
    }

    pub fn is_empty(&self) -> bool {
        self.stats.live == 0
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("stats", &self.stats)
            .field("slots", &self.entries.len())
            .finish()
    }
}
