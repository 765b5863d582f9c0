//! The terrain owns the grid of chunks and decides, once per frame, which edits and mesh jobs run

use std::collections::VecDeque;
use std::sync::Arc;

use bevy::log::{debug, info, warn};
use bevy::math::{IVec3, Vec3};
use bevy::prelude::Resource;
use bevy::tasks::block_on;
use bevy::utils::HashMap;

use crate::apply::spawn_generate;
use crate::chunk::PendingEdit;
use crate::edit::Aabb;
use crate::{
    Chunk, ChunkPosition, ChunkState, MeshId, MeshJob, MeshJobHandler, Result, SavedMap,
    TerrainConfig, TerrainError, TerrainHost, Voxel, VoxelEdit, VoxelGenerator,
};

/// Called with the change in solid voxels per material once every chunk an edit touched has
/// published its new mesh
pub type CountersCallback = Box<dyn FnOnce(&[i32]) + Send + Sync>;

/// Called once when the initial generation or load of the grid is visible
pub type GeneratedCallback = Box<dyn FnOnce() + Send + Sync>;

/// How an edit is scheduled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EditOptions {
    /// Keep the edit around until it can run instead of rejecting it
    pub never_forget: bool,
    /// Every touched chunk has to take the edit in the same frame
    pub symmetric: bool,
    /// Mesh the touched chunks without spreading the work over several frames
    pub immediate: bool,
}

/// What happened to a submitted edit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditSubmission {
    /// The edit was queued on this many chunks
    Applied {
        /// Number of chunks the edit was queued on
        chunks: usize,
    },
    /// The edit could not run this frame and will be retried
    Deferred,
    /// The edit could not run this frame and was dropped
    Rejected,
    /// The edit touched no loaded chunk. Its callback has already been called
    NoChunks,
}

/// A snapshot of the scheduler, for debug overlays
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerrainStats {
    /// Frames ticked so far
    pub frame: u64,
    /// Mesh requests waiting for a handler
    pub pending_mesh_jobs: usize,
    /// Handlers running a job
    pub busy_handlers: usize,
    /// Collision bakes the host has not finished
    pub pending_bakes: usize,
    /// Edits waiting to be submitted again
    pub deferred_edits: usize,
    /// Chunks whose voxels are still being generated
    pub generating_chunks: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MeshRequest {
    chunk: usize,
    max_frames: u32,
}

/// FIFO of chunks waiting to be meshed. A chunk is queued at most once, with the budget of the
/// job it will run next
#[derive(Default)]
struct MeshQueue(VecDeque<MeshRequest>);

impl MeshQueue {
    fn request(&mut self, chunk: usize, max_frames: u32) {
        if !self.0.iter().any(|r| r.chunk == chunk) {
            self.0.push_back(MeshRequest { chunk, max_frames });
        }
    }
}

struct DeferredEdit {
    edit: Arc<dyn VoxelEdit>,
    options: EditOptions,
    callback: Option<CountersCallback>,
    attempts: u32,
}

struct EditTicket {
    deltas: Vec<i32>,
    pending: usize,
    callback: Option<CountersCallback>,
}

/// The voxel terrain. Owns every chunk, the pool of mesh handlers and all queues between them
#[derive(Resource)]
pub struct Terrain {
    config: TerrainConfig,
    chunks: Vec<Chunk>,
    handlers: Vec<MeshJobHandler>,
    mesh_queue: MeshQueue,
    deferred: Vec<DeferredEdit>,
    tickets: HashMap<u64, EditTicket>,
    next_ticket: u64,
    bakes: Vec<(usize, MeshId)>,
    frame: u64,
    unpublished: usize,
    on_generated: Option<GeneratedCallback>,
}

impl Terrain {
    /// Create an ungenerated terrain
    pub fn new(config: TerrainConfig) -> Result<Self> {
        config.validate()?;
        let grid = config.grid();
        let chunks = (0..config.chunk_count())
            .map(|index| Chunk::new(ChunkPosition::from_index(index, grid), &config))
            .collect();
        let handlers = (0..config.mesh_jobs_per_frame)
            .map(|_| MeshJobHandler::new(&config))
            .collect();
        Ok(Self {
            config,
            chunks,
            handlers,
            mesh_queue: MeshQueue::default(),
            deferred: Vec::new(),
            tickets: HashMap::default(),
            next_ticket: 0,
            bakes: Vec::new(),
            frame: 0,
            unpublished: 0,
            on_generated: None,
        })
    }

    /// The configuration the terrain was created with
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// All chunks, in grid order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// The chunk at a grid position
    pub fn chunk(&self, position: ChunkPosition) -> Option<&Chunk> {
        position
            .to_index(self.config.grid())
            .map(|index| &self.chunks[index])
    }

    /// Choose whether a chunk's meshes get colliders from now on
    pub fn set_collisions(&mut self, position: ChunkPosition, collisions: bool) {
        if let Some(index) = position.to_index(self.config.grid()) {
            self.chunks[index].collisions = collisions;
        }
    }

    /// Register a callback for when the current generation or load is fully meshed. It is called
    /// right away if nothing is waiting to be published
    pub fn on_generated(&mut self, callback: GeneratedCallback) {
        if self.unpublished == 0 && self.chunks.iter().all(|c| c.published) {
            callback();
        } else {
            self.on_generated = Some(callback);
        }
    }

    /// Whether every chunk has published a mesh since the last generation or load
    pub fn is_generated(&self) -> bool {
        self.unpublished == 0 && self.chunks.iter().all(|c| c.published)
    }

    /// A snapshot of the scheduler
    pub fn stats(&self) -> TerrainStats {
        TerrainStats {
            frame: self.frame,
            pending_mesh_jobs: self.mesh_queue.0.len(),
            busy_handlers: self.handlers.iter().filter(|h| !h.is_free()).count(),
            pending_bakes: self.bakes.len(),
            deferred_edits: self.deferred.len(),
            generating_chunks: self.chunks.iter().filter(|c| c.generation.is_some()).count(),
        }
    }

    /// Generate every chunk's voxels from `generator` on the async pool. Anything the terrain held
    /// before is dropped
    pub fn generate_with(&mut self, generator: Arc<dyn VoxelGenerator>) {
        self.reset();
        info!(
            "Generating {} chunks of {} voxels",
            self.chunks.len(),
            self.config.volume()
        );
        for chunk in &mut self.chunks {
            chunk.generation = Some(spawn_generate(
                generator.clone(),
                self.config.clone(),
                chunk.origin(),
            ));
            chunk.state = ChunkState::Generating;
        }
        self.unpublished = self.chunks.len();
    }

    /// Replace the voxels of every chunk with a saved map. The map is decoded completely before
    /// anything is installed. On failure the terrain is left ungenerated
    pub fn load_map(&mut self, map: &SavedMap) -> Result<()> {
        self.reset();
        let fields = match map.decode(&self.config) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Failed to load map: {e}");
                return Err(e);
            }
        };

        for (index, (chunk, field)) in self.chunks.iter_mut().zip(fields).enumerate() {
            chunk.field = Some(field);
            chunk.state = ChunkState::Meshing;
            self.mesh_queue.request(index, self.config.max_mesh_frames);
        }
        self.unpublished = self.chunks.len();
        info!("Loaded map with {} regions", map.regions.len());
        Ok(())
    }

    /// Save the voxels of every chunk. Edits that have not been meshed yet are not included
    pub fn save_map(&self) -> Result<SavedMap> {
        let mut fields = Vec::with_capacity(self.chunks.len());
        for (index, chunk) in self.chunks.iter().enumerate() {
            fields.push(
                chunk
                    .field
                    .as_ref()
                    .ok_or(TerrainError::NotGenerated { chunk: index })?,
            );
        }
        let map = SavedMap::encode(&self.config, fields)?;
        info!("Saved map with {} regions", map.regions.len());
        Ok(map)
    }

    /// The voxel nearest to a world position, or [`Voxel::EMPTY`] when the position is outside the
    /// grid or its chunk has no voxels yet
    pub fn try_get_voxel(&self, position: Vec3) -> Voxel {
        let Some(chunk) = ChunkPosition::from_translation(&self.config, position)
            .and_then(|p| self.chunk(p))
        else {
            return Voxel::EMPTY;
        };
        let Some(field) = chunk.field() else {
            return Voxel::EMPTY;
        };

        let coord = self
            .config
            .world_to_lattice(chunk.origin(), position)
            .round()
            .as_ivec3();
        let lattice = field.lattice();
        if !lattice.contains(coord.to_array()) {
            return Voxel::EMPTY;
        }
        field.get_voxel(coord.max(IVec3::ZERO).as_uvec3())
    }

    /// Submit an edit. See [`EditSubmission`] for what can happen to it
    pub fn apply_edit<E>(
        &mut self,
        edit: E,
        options: EditOptions,
        callback: Option<CountersCallback>,
    ) -> EditSubmission
    where
        E: VoxelEdit + 'static,
    {
        self.submit(DeferredEdit {
            edit: Arc::new(edit),
            options,
            callback,
            attempts: 0,
        })
    }

    /// Submit an edit that is already shared
    pub fn apply_shared_edit(
        &mut self,
        edit: Arc<dyn VoxelEdit>,
        options: EditOptions,
        callback: Option<CountersCallback>,
    ) -> EditSubmission {
        self.submit(DeferredEdit {
            edit,
            options,
            callback,
            attempts: 0,
        })
    }

    fn targets(&self, bounds: Aabb) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state != ChunkState::Unloaded && c.bounds().intersects(&bounds))
            .map(|(index, _)| index)
            .collect()
    }

    fn is_busy(&self, chunk: usize) -> bool {
        let c = &self.chunks[chunk];
        c.generation.is_some()
            || !c.pending_edits.is_empty()
            || self.handlers.iter().any(|h| h.chunk() == Some(chunk))
    }

    /// Whether a non-symmetric edit on `targets` can start meshing without waiting on other work.
    /// Queued requests and running jobs both take up a handler, and a chunk takes one edit at a time
    fn has_capacity_for(&self, targets: &[usize]) -> bool {
        let busy = self.handlers.iter().filter(|h| !h.is_free()).count();
        self.mesh_queue.0.len() + busy < self.handlers.len()
            && targets
                .iter()
                .all(|&c| self.chunks[c].pending_edits.is_empty())
    }

    fn submit(&mut self, mut deferred: DeferredEdit) -> EditSubmission {
        let bounds = deferred.edit.bounds().expand(self.config.edit_margin);
        let targets = self.targets(bounds);
        if targets.is_empty() {
            if let Some(callback) = deferred.callback.take() {
                callback(&vec![0; self.config.max_materials]);
            }
            return EditSubmission::NoChunks;
        }

        if deferred.options.symmetric {
            if targets.iter().any(|&c| self.is_busy(c)) {
                if deferred.attempts < self.config.max_symmetric_retries {
                    deferred.attempts += 1;
                    self.deferred.push(deferred);
                    return EditSubmission::Deferred;
                }
                debug!(
                    "Symmetric edit waited {} frames, queueing it on {} busy chunks",
                    deferred.attempts,
                    targets.len()
                );
            }
        } else if !self.has_capacity_for(&targets) {
            debug!(
                "No free mesh handler for an edit on {} chunks",
                targets.len()
            );
            if deferred.options.never_forget {
                deferred.attempts += 1;
                self.deferred.push(deferred);
                return EditSubmission::Deferred;
            }
            return EditSubmission::Rejected;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(
            ticket,
            EditTicket {
                deltas: vec![0; self.config.max_materials],
                pending: targets.len(),
                callback: deferred.callback,
            },
        );

        let max_frames = if deferred.options.immediate {
            0
        } else {
            self.config.max_mesh_frames
        };
        for &index in &targets {
            let chunk = &mut self.chunks[index];
            chunk.pending_edits.push_back(PendingEdit {
                edit: deferred.edit.clone(),
                ticket,
                max_frames,
            });
            if chunk.generation.is_none() {
                chunk.state = ChunkState::Meshing;
                let budget = chunk.pending_edits.front().map_or(max_frames, |p| p.max_frames);
                self.mesh_queue.request(index, budget);
            }
        }
        EditSubmission::Applied {
            chunks: targets.len(),
        }
    }

    /// Advance the terrain by one frame: finish generation and bakes, retry deferred edits,
    /// publish finished meshes and start new mesh jobs
    pub fn tick(&mut self, host: &mut impl TerrainHost) {
        self.frame += 1;
        self.poll_generation(false);
        self.poll_bakes(host);
        self.drain_deferred();
        self.harvest(host, false);
        self.start_jobs();
        // Jobs without a frame budget finish in the frame they were started
        self.harvest(host, false);
    }

    fn poll_generation(&mut self, block: bool) {
        for (index, chunk) in self.chunks.iter_mut().enumerate() {
            let Some(task) = chunk.generation.as_ref() else {
                continue;
            };
            if !block && !task.is_finished() {
                continue;
            }
            if let Some(field) = chunk.generation.take().map(block_on) {
                chunk.field = Some(field);
                chunk.state = ChunkState::Meshing;
                self.mesh_queue.request(index, self.config.max_mesh_frames);
            }
        }
    }

    fn poll_bakes(&mut self, host: &mut impl TerrainHost) {
        self.bakes.retain(|&(chunk, mesh)| {
            if !host.is_bake_complete(mesh) {
                return true;
            }
            host.install_collider(chunk, mesh);
            false
        });
    }

    fn drain_deferred(&mut self) {
        for deferred in std::mem::take(&mut self.deferred) {
            self.submit(deferred);
        }
    }

    fn harvest(&mut self, host: &mut impl TerrainHost, block: bool) {
        for handler in &mut self.handlers {
            let finished = if block {
                handler.complete()
            } else {
                handler.poll(self.frame)
            };
            let Some(finished) = finished else {
                continue;
            };

            let chunk = &mut self.chunks[finished.chunk];
            let Some(field) = chunk.field.as_mut() else {
                continue;
            };
            handler.swap_field(field);

            let Some(counts) = handler.material_counts() else {
                continue;
            };
            let popped = if finished.applied_edit {
                chunk.pending_edits.pop_front()
            } else {
                None
            };
            if let Some(pending) = popped {
                if let Some(ticket) = self.tickets.get_mut(&pending.ticket) {
                    for ((delta, new), old) in ticket
                        .deltas
                        .iter_mut()
                        .zip(counts)
                        .zip(&chunk.material_counts)
                    {
                        *delta += *new as i32 - *old as i32;
                    }
                    ticket.pending -= 1;
                    if ticket.pending == 0 {
                        let ticket = self.tickets.remove(&pending.ticket);
                        if let Some(EditTicket {
                            deltas,
                            callback: Some(callback),
                            ..
                        }) = ticket
                        {
                            callback(&deltas);
                        }
                    }
                }
            }
            chunk.material_counts.copy_from_slice(counts);

            if let Some(mesh) = handler.description() {
                let id = host.upload_mesh(finished.chunk, &mesh);
                chunk.mesh = Some(id);
                if mesh.needs_collision_bake {
                    host.begin_collision_bake(id);
                    self.bakes.push((finished.chunk, id));
                }
            }

            match chunk.pending_edits.front() {
                None => chunk.state = ChunkState::Ready,
                Some(next) => self.mesh_queue.request(finished.chunk, next.max_frames),
            }

            if !chunk.published {
                chunk.published = true;
                self.unpublished = self.unpublished.saturating_sub(1);
                if self.unpublished == 0 {
                    info!("Terrain generation finished after {} frames", self.frame);
                    if let Some(callback) = self.on_generated.take() {
                        callback();
                    }
                }
            }
        }
    }

    fn start_jobs(&mut self) {
        let mut waiting = VecDeque::new();
        while let Some(request) = self.mesh_queue.0.pop_front() {
            if self.handlers.iter().any(|h| h.chunk() == Some(request.chunk)) {
                waiting.push_back(request);
                continue;
            }
            let Some(handler) = self.handlers.iter_mut().find(|h| h.is_free()) else {
                debug!("All mesh handlers are busy, {} requests wait", self.mesh_queue.0.len() + 1);
                waiting.push_back(request);
                break;
            };

            let chunk = &self.chunks[request.chunk];
            let Some(field) = chunk.field.as_ref() else {
                continue;
            };
            // The first mesh of a chunk only establishes its material counts
            let edit = if chunk.published {
                chunk.pending_edits.front().map(|p| p.edit.clone())
            } else {
                None
            };
            let job = MeshJob {
                chunk: request.chunk,
                origin: chunk.origin(),
                edit,
                collisions: chunk.collisions,
                max_frames: request.max_frames,
            };
            handler.start(job, field, &self.config, self.frame);
        }
        waiting.append(&mut self.mesh_queue.0);
        self.mesh_queue.0 = waiting;
    }

    /// Whether nothing is queued, deferred, generating or meshing
    pub fn is_idle(&self) -> bool {
        self.mesh_queue.0.is_empty()
            && self.deferred.is_empty()
            && self.handlers.iter().all(|h| h.is_free())
            && self.chunks.iter().all(|c| c.generation.is_none())
    }

    /// Block until every generation, deferred edit and mesh job has finished and been published
    pub fn flush(&mut self, host: &mut impl TerrainHost) {
        while !self.is_idle() {
            self.frame += 1;
            self.poll_generation(true);
            self.poll_bakes(host);
            self.drain_deferred();
            self.start_jobs();
            self.harvest(host, true);
        }
    }

    /// Finish all outstanding work, wait for every collision bake, then drop all queued state.
    /// Call this before the host tears down its meshes
    pub fn shutdown(&mut self, host: &mut impl TerrainHost) {
        self.flush(host);
        while !self.bakes.is_empty() {
            self.poll_bakes(host);
            std::thread::yield_now();
        }
        info!("Terrain shut down after {} frames", self.frame);
    }

    /// Drop every chunk's voxels and all work in flight
    fn reset(&mut self) {
        for handler in &mut self.handlers {
            handler.complete();
        }
        for chunk in &mut self.chunks {
            chunk.unload();
        }
        self.mesh_queue.0.clear();
        self.deferred.clear();
        self.tickets.clear();
        self.bakes.clear();
        self.unpublished = 0;
    }
}
