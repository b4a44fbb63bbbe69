//! The tunestore kernel: artists, songs, and the relationships between them.
//!
//! The kernel owns the arena, one hash index per record kind, and two join
//! trees holding every relationship in both orientations:
//!
//! - `by_artist`: `(artist, song)` to song handle
//! - `by_song`: `(song, artist)` to artist handle
//!
//! No component refers to another. The kernel passes the arena into each
//! index and tree call, and applies every arena [`Relocation`] to all of
//! them before returning, so the handles it holds always belong to the
//! current generation. Handles held by callers go stale on relocation and
//! are rejected; look them up again with [`Kernel::find_record`].

use std::fmt;

use crate::config::KernelConfig;
use crate::storage::{
    Arena, ArenaError, ContentOrder, HashIndex, Handle, IndexError, JoinKey, JoinPair, Relocation,
    RelocationError, TwoThreeTree,
};

/// Join tree type: composite key to the partner record's handle.
pub type JoinTree = TwoThreeTree<JoinKey, Handle>;

/// The two kinds of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Artist,
    Song,
}

impl RecordKind {
    /// The kind on the other side of a relationship.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Artist => Self::Song,
            Self::Song => Self::Artist,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Song => "song",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`Kernel::insert_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    pub handle: Handle,
    /// False when the record already existed.
    pub created: bool,
}

/// Outcome of [`Kernel::insert_pair`]. Both handles are current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairInsertion {
    pub artist: Insertion,
    pub song: Insertion,
    /// False when the relationship already existed.
    pub pair_created: bool,
}

/// Outcome of removing one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRemoval {
    pub artist: String,
    pub song: String,
    /// Records deleted because this was their last relationship.
    pub deleted: Vec<(RecordKind, String)>,
}

/// Outcome of [`Kernel::remove_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRemoval {
    pub kind: RecordKind,
    pub name: String,
    /// Every partner the record was related to, ascending.
    pub partners: Vec<String>,
    /// Partners deleted because they were left with no relationship.
    pub deleted: Vec<String>,
}

/// Live hash index slots of one kind, in physical slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDump {
    pub kind: RecordKind,
    pub entries: Vec<(usize, String)>,
}

impl fmt::Display for IndexDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (slot, name) in &self.entries {
            writeln!(f, "|{name}| {slot}")?;
        }
        Ok(())
    }
}

/// One relationship as shown in a tree dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpedPair {
    pub primary: String,
    pub primary_offset: usize,
    pub secondary: String,
    pub secondary_offset: usize,
}

impl fmt::Display for DumpedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}@{}, {}@{})",
            self.primary, self.primary_offset, self.secondary, self.secondary_offset
        )
    }
}

/// Join tree nodes level by level, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDump {
    pub kind: RecordKind,
    /// Each level lists its nodes; each node lists its one or two pairs.
    pub levels: Vec<Vec<Vec<DumpedPair>>>,
}

impl fmt::Display for TreeDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in &self.levels {
            let nodes: Vec<String> = level
                .iter()
                .map(|node| {
                    let pairs: Vec<String> = node.iter().map(ToString::to_string).collect();
                    format!("[{}]", pairs.join(" "))
                })
                .collect();
            writeln!(f, "{}", nodes.join(" "))?;
        }
        Ok(())
    }
}

/// The kernel.
///
/// # Invariants
///
/// - every handle in an index or tree belongs to the current arena generation
/// - each live record is registered in exactly one index, once
/// - `by_artist` holds `(a, s)` exactly when `by_song` holds `(s, a)`
/// - every record in an index has at least one relationship, unless it was
///   inserted alone through [`Kernel::insert_record`]
#[derive(Debug)]
pub struct Kernel {
    config: KernelConfig,
    arena: Arena,
    artists: HashIndex,
    songs: HashIndex,
    by_artist: JoinTree,
    by_song: JoinTree,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Kernel {
    /// Create an empty kernel.
    #[must_use]
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            arena: Arena::new(config.block_size()),
            artists: HashIndex::new(config.initial_hash_size()),
            songs: HashIndex::new(config.initial_hash_size()),
            by_artist: TwoThreeTree::new(),
            by_song: TwoThreeTree::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    /// The hash index of one kind.
    #[must_use]
    pub const fn index(&self, kind: RecordKind) -> &HashIndex {
        match kind {
            RecordKind::Artist => &self.artists,
            RecordKind::Song => &self.songs,
        }
    }

    /// The join tree keyed by records of `kind`.
    #[must_use]
    pub const fn tree(&self, kind: RecordKind) -> &JoinTree {
        match kind {
            RecordKind::Artist => &self.by_artist,
            RecordKind::Song => &self.by_song,
        }
    }

    /// Ordering for the join trees over the current arena.
    #[must_use]
    pub const fn order(&self) -> ContentOrder<'_> {
        ContentOrder::new(&self.arena)
    }

    /// Look up a record by content.
    #[must_use]
    pub fn find_record(&self, kind: RecordKind, text: &str) -> Option<Handle> {
        self.index(kind).search(text.as_bytes(), &self.arena)
    }

    /// Insert a record unless one with the same content exists.
    pub fn insert_record(&mut self, kind: RecordKind, text: &str) -> Result<Insertion, KernelError> {
        self.insert_record_relocating(kind, text)
            .map(|(insertion, _)| insertion)
    }

    /// Delete a record that no relationship references.
    ///
    /// Returns `Ok(false)` if the record was already deleted and the arena
    /// has not grown since. Growth retires every handle issued before it:
    /// a repeated delete through such a handle fails with
    /// `ArenaError::StaleHandle` whether or not the record survived, and
    /// `find_record` tells which.
    pub fn delete_record(&mut self, kind: RecordKind, handle: Handle) -> Result<bool, KernelError> {
        match self.arena.get(&handle) {
            Ok(_) => {}
            Err(ArenaError::Inactive { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.check_record(kind, handle)?;

        let references = self.partners(kind, handle).len();
        if references > 0 {
            return Err(KernelError::RecordInUse { kind, references });
        }
        self.erase(kind, handle)?;
        Ok(true)
    }

    /// Resolve a handle to its text.
    pub fn text(&self, handle: Handle) -> Result<&str, KernelError> {
        Ok(self.arena.get_str(&handle)?)
    }

    /// Relate an artist and a song. Returns false if they already are.
    pub fn join_insert(&mut self, artist: Handle, song: Handle) -> Result<bool, KernelError> {
        self.check_record(RecordKind::Artist, artist)?;
        self.check_record(RecordKind::Song, song)?;

        let key = JoinKey::new(artist, song);
        if self.by_artist.contains(&key, &self.order()) {
            return Ok(false);
        }
        self.link(artist, song);
        Ok(true)
    }

    /// Remove the relationship between an artist and a song.
    ///
    /// Each side left with no relationship is deleted from its index and the
    /// arena. Returns `None` if the two were not related.
    pub fn join_remove(
        &mut self,
        artist: Handle,
        song: Handle,
    ) -> Result<Option<PairRemoval>, KernelError> {
        self.check_record(RecordKind::Artist, artist)?;
        self.check_record(RecordKind::Song, song)?;
        let artist_name = self.text(artist)?.to_owned();
        let song_name = self.text(song)?.to_owned();

        if !self.unlink(RecordKind::Artist, artist, song) {
            return Ok(None);
        }

        let mut deleted = Vec::new();
        for (kind, handle) in [(RecordKind::Artist, artist), (RecordKind::Song, song)] {
            if self.partners(kind, handle).is_empty() {
                deleted.push((kind, self.erase(kind, handle)?));
            }
        }

        Ok(Some(PairRemoval {
            artist: artist_name,
            song: song_name,
            deleted,
        }))
    }

    /// Every relationship of one record, ordered by partner content.
    ///
    /// With `as_primary` the handle is an artist and the pairs are its
    /// songs; otherwise it is a song and the pairs are its artists.
    pub fn join_range_query(
        &self,
        handle: Handle,
        as_primary: bool,
    ) -> Result<Vec<JoinPair>, KernelError> {
        let kind = if as_primary {
            RecordKind::Artist
        } else {
            RecordKind::Song
        };
        self.check_record(kind, handle)?;

        Ok(self
            .partners(kind, handle)
            .into_iter()
            .map(|secondary| JoinPair {
                primary: handle,
                secondary,
            })
            .collect())
    }

    /// Insert both records if needed and relate them.
    pub fn insert_pair(&mut self, artist: &str, song: &str) -> Result<PairInsertion, KernelError> {
        let (mut artist, _) = self.insert_record_relocating(RecordKind::Artist, artist)?;
        let (song, relocation) = self.insert_record_relocating(RecordKind::Song, song)?;
        if let Some(relocation) = relocation {
            artist.handle = relocation.translate(artist.handle)?;
        }

        let pair_created = self.join_insert(artist.handle, song.handle)?;
        Ok(PairInsertion {
            artist,
            song,
            pair_created,
        })
    }

    /// Remove a relationship by names. `None` if either name or the
    /// relationship is absent.
    pub fn delete_pair(&mut self, artist: &str, song: &str) -> Result<Option<PairRemoval>, KernelError> {
        let (Some(artist), Some(song)) = (
            self.find_record(RecordKind::Artist, artist),
            self.find_record(RecordKind::Song, song),
        ) else {
            return Ok(None);
        };
        self.join_remove(artist, song)
    }

    /// Remove a record and every relationship it has.
    ///
    /// Partners left with no relationship are deleted too. `None` if no
    /// record of this kind has that name.
    pub fn remove_record(
        &mut self,
        kind: RecordKind,
        name: &str,
    ) -> Result<Option<RecordRemoval>, KernelError> {
        let Some(handle) = self.find_record(kind, name) else {
            return Ok(None);
        };

        let partners = self.partners(kind, handle);
        let partner_names = self.names(&partners)?;
        for &partner in &partners {
            self.unlink(kind, handle, partner);
        }

        let mut deleted = Vec::new();
        for (&partner, partner_name) in partners.iter().zip(&partner_names) {
            if self.partners(kind.other(), partner).is_empty() {
                self.erase(kind.other(), partner)?;
                deleted.push(partner_name.as_str().to_owned());
            }
        }
        let name = self.erase(kind, handle)?;

        Ok(Some(RecordRemoval {
            kind,
            name,
            partners: partner_names,
            deleted,
        }))
    }

    /// Names related to `name`, ascending. `None` if `name` is absent.
    pub fn list(&self, kind: RecordKind, name: &str) -> Result<Option<Vec<String>>, KernelError> {
        self.find_record(kind, name)
            .map(|handle| self.names(&self.partners(kind, handle)))
            .transpose()
    }

    /// Number of live records of one kind.
    #[must_use]
    pub const fn record_count(&self, kind: RecordKind) -> usize {
        self.index(kind).len()
    }

    /// Number of relationships.
    #[must_use]
    pub const fn pair_count(&self) -> usize {
        self.by_artist.len()
    }

    /// Live index slots of one kind.
    pub fn index_dump(&self, kind: RecordKind) -> Result<IndexDump, KernelError> {
        let entries = self
            .index(kind)
            .iter()
            .map(|(slot, handle)| self.text(handle).map(|name| (slot, name.to_owned())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndexDump { kind, entries })
    }

    /// Join tree keyed by `kind`, level by level.
    pub fn tree_dump(&self, kind: RecordKind) -> Result<TreeDump, KernelError> {
        let mut levels = Vec::new();
        for level in self.tree(kind).levels() {
            let mut nodes = Vec::with_capacity(level.len());
            for entries in level {
                let pairs = entries
                    .iter()
                    .map(|(key, partner)| self.dump_pair(key.primary, *partner))
                    .collect::<Result<Vec<_>, _>>()?;
                nodes.push(pairs);
            }
            levels.push(nodes);
        }
        Ok(TreeDump { kind, levels })
    }

    /// Text of every live record in storage order.
    #[must_use]
    pub fn arena_records(&self) -> Vec<String> {
        self.arena
            .records()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Drop every record and relationship and return to the configured sizes.
    pub fn reset(&mut self) {
        self.arena = Arena::new(self.config.block_size());
        self.artists.clear();
        self.songs.clear();
        self.by_artist.clear();
        self.by_song.clear();
        tracing::debug!("kernel reset");
    }

    fn insert_record_relocating(
        &mut self,
        kind: RecordKind,
        text: &str,
    ) -> Result<(Insertion, Option<Relocation>), KernelError> {
        if let Some(handle) = self.find_record(kind, text) {
            return Ok((
                Insertion {
                    handle,
                    created: false,
                },
                None,
            ));
        }

        let stored = self.arena.insert(text.as_bytes())?;
        if let Some(relocation) = &stored.relocation {
            self.relocate(relocation)?;
        }
        if let Err(e) = self.register(kind, stored.handle) {
            self.arena.delete(&stored.handle)?;
            return Err(e);
        }

        tracing::debug!("created {} '{}' at {}", kind, text, stored.handle);
        Ok((
            Insertion {
                handle: stored.handle,
                created: true,
            },
            stored.relocation,
        ))
    }

    /// Add a handle to its kind's index, forcing growth once if the probe
    /// cycle is full.
    fn register(&mut self, kind: RecordKind, handle: Handle) -> Result<(), KernelError> {
        let index = match kind {
            RecordKind::Artist => &mut self.artists,
            RecordKind::Song => &mut self.songs,
        };

        match index.insert(handle, &self.arena) {
            Ok(_) => Ok(()),
            Err(IndexError::CapacityExhausted { capacity }) => {
                tracing::warn!(
                    "{} index found no open slot at capacity {}, forcing growth",
                    kind,
                    capacity
                );
                index.grow(&self.arena)?;
                index.insert(handle, &self.arena)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rewrite every held handle into the arena's new generation.
    fn relocate(&mut self, relocation: &Relocation) -> Result<(), KernelError> {
        self.relocate_holders(relocation).map_err(|e| {
            tracing::error!(
                "relocation to generation {} failed: {}",
                relocation.to_generation(),
                e
            );
            e.into()
        })
    }

    fn relocate_holders(&mut self, relocation: &Relocation) -> Result<(), RelocationError> {
        self.artists.relocate(relocation)?;
        self.songs.relocate(relocation)?;
        for tree in [&mut self.by_artist, &mut self.by_song] {
            tree.try_rewrite(|key, partner| {
                key.relocate(relocation)?;
                *partner = relocation.translate(*partner)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Check that `handle` is current, live, and registered as `kind`.
    fn check_record(&self, kind: RecordKind, handle: Handle) -> Result<(), KernelError> {
        let content = self.arena.get(&handle)?;
        if self.index(kind).search(content, &self.arena) == Some(handle) {
            Ok(())
        } else {
            Err(KernelError::WrongKind { kind })
        }
    }

    /// Partners of a record of `kind`, ordered by content.
    fn partners(&self, kind: RecordKind, handle: Handle) -> Vec<Handle> {
        self.tree(kind)
            .range_search(
                &JoinKey::lower_bound(handle),
                &JoinKey::upper_bound(handle),
                &self.order(),
            )
            .into_iter()
            .copied()
            .collect()
    }

    fn names(&self, handles: &[Handle]) -> Result<Vec<String>, KernelError> {
        handles
            .iter()
            .map(|handle| self.text(*handle).map(str::to_owned))
            .collect()
    }

    /// Insert the relationship in both trees.
    fn link(&mut self, artist: Handle, song: Handle) {
        let order = ContentOrder::new(&self.arena);
        self.by_artist.insert(JoinKey::new(artist, song), song, &order);
        self.by_song.insert(JoinKey::new(song, artist), artist, &order);
        tracing::debug!("linked artist {} with song {}", artist, song);
    }

    /// Remove the relationship between `record` (of `kind`) and `partner`
    /// from both trees. Returns false if it did not exist.
    fn unlink(&mut self, kind: RecordKind, record: Handle, partner: Handle) -> bool {
        let order = ContentOrder::new(&self.arena);
        let (own, other) = match kind {
            RecordKind::Artist => (&mut self.by_artist, &mut self.by_song),
            RecordKind::Song => (&mut self.by_song, &mut self.by_artist),
        };

        if own.remove(&JoinKey::new(record, partner), &order).is_none() {
            return false;
        }
        other.remove(&JoinKey::new(partner, record), &order);
        tracing::debug!("unlinked {} {} from {}", kind, record, partner);
        true
    }

    /// Drop a record from its index and mark it deleted in the arena.
    /// Returns its text.
    fn erase(&mut self, kind: RecordKind, handle: Handle) -> Result<String, KernelError> {
        let name = self.text(handle)?.to_owned();
        let index = match kind {
            RecordKind::Artist => &mut self.artists,
            RecordKind::Song => &mut self.songs,
        };
        index.delete(&handle, &self.arena)?;
        self.arena.delete(&handle)?;
        tracing::debug!("deleted {} '{}' at {}", kind, name, handle);
        Ok(name)
    }

    fn dump_pair(&self, primary: Handle, secondary: Handle) -> Result<DumpedPair, KernelError> {
        Ok(DumpedPair {
            primary: self.text(primary)?.to_owned(),
            primary_offset: primary.record_offset(),
            secondary: self.text(secondary)?.to_owned(),
            secondary_offset: secondary.record_offset(),
        })
    }
}

/// Errors that can occur during kernel operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Arena error.
    Arena(ArenaError),
    /// Hash index error.
    Index(IndexError),
    /// A held handle could not be relocated.
    Relocation(RelocationError),
    /// The record still has relationships.
    RecordInUse { kind: RecordKind, references: usize },
    /// The handle is not a record of this kind.
    WrongKind { kind: RecordKind },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arena(e) => write!(f, "arena error: {e}"),
            Self::Index(e) => write!(f, "index error: {e}"),
            Self::Relocation(e) => write!(f, "relocation error: {e}"),
            Self::RecordInUse { kind, references } => {
                write!(f, "{kind} record is referenced by {references} pairs")
            }
            Self::WrongKind { kind } => write!(f, "handle is not a registered {kind} record"),
        }
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Arena(e) => Some(e),
            Self::Index(e) => Some(e),
            Self::Relocation(e) => Some(e),
            Self::RecordInUse { .. } | Self::WrongKind { .. } => None,
        }
    }
}

impl From<ArenaError> for KernelError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}

impl From<IndexError> for KernelError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

impl From<RelocationError> for KernelError {
    fn from(e: RelocationError) -> Self {
        Self::Relocation(e)
    }
}
