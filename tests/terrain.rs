use std::sync::{Arc, Mutex};

use bevy::math::Vec3;
use voxel_terrain::edit::{AddEdit, SetDensityEdit};
use voxel_terrain::{
    ChunkPosition, ChunkState, EditOptions, EditSubmission, FlatGenerator, MeshDescription,
    MeshId, Terrain, TerrainConfig, TerrainError, TerrainHost, Voxel,
};

/// A host that remembers everything the terrain asked of it. Bakes finish on their second poll
#[derive(Default)]
struct RecordingHost {
    next_id: u64,
    triangles: Vec<usize>,
    uploads: Vec<usize>,
    bakes_started: Vec<MeshId>,
    bake_polls: Vec<MeshId>,
    colliders: Vec<(usize, MeshId)>,
}

impl RecordingHost {
    fn new(chunks: usize) -> Self {
        Self {
            triangles: vec![0; chunks],
            ..Default::default()
        }
    }

    /// Bakes started for meshes of `chunk`. Ids are handed out in upload order
    fn bakes_for(&self, chunk: usize) -> usize {
        self.bakes_started
            .iter()
            .filter(|id| self.uploads[id.0 as usize - 1] == chunk)
            .count()
    }
}

impl TerrainHost for RecordingHost {
    fn upload_mesh(&mut self, chunk: usize, mesh: &MeshDescription) -> MeshId {
        self.next_id += 1;
        self.triangles[chunk] = mesh.triangle_count();
        self.uploads.push(chunk);
        MeshId(self.next_id)
    }

    fn begin_collision_bake(&mut self, mesh: MeshId) {
        self.bakes_started.push(mesh);
    }

    fn is_bake_complete(&mut self, mesh: MeshId) -> bool {
        let done = self.bake_polls.contains(&mesh);
        self.bake_polls.push(mesh);
        done
    }

    fn install_collider(&mut self, chunk: usize, mesh: MeshId) {
        self.colliders.push((chunk, mesh));
    }
}

fn config(chunk_size: u32, grid_size: [u32; 3]) -> TerrainConfig {
    TerrainConfig {
        chunk_size,
        grid_size,
        ..Default::default()
    }
}

fn generated(config: TerrainConfig, height: f32) -> (Terrain, RecordingHost) {
    let mut host = RecordingHost::new(config.chunk_count());
    let mut terrain = Terrain::new(config).unwrap();
    terrain.generate_with(Arc::new(FlatGenerator {
        height,
        material: 1,
    }));
    terrain.flush(&mut host);
    assert!(terrain.is_generated());
    (terrain, host)
}

type Deltas = Arc<Mutex<Vec<Vec<i32>>>>;

fn recorder() -> (Deltas, Option<voxel_terrain::CountersCallback>) {
    let calls: Deltas = Arc::default();
    let sink = calls.clone();
    let callback: voxel_terrain::CountersCallback = Box::new(move |deltas: &[i32]| {
        sink.lock().unwrap().push(deltas.to_vec());
    });
    (calls, Some(callback))
}

fn dig(center: Vec3, strength: f32) -> AddEdit {
    AddEdit {
        center,
        radius: 1.5,
        strength,
        material: 0,
        write_material: false,
    }
}

#[test]
fn add_edit_on_single_chunk() {
    let config = config(4, [1, 1, 1]);
    let mut host = RecordingHost::new(1);
    let mut terrain = Terrain::new(config).unwrap();
    terrain.generate_with(Arc::new(|_: Vec3| Voxel::EMPTY));
    terrain.flush(&mut host);

    let (calls, callback) = recorder();
    let edit = AddEdit {
        center: Vec3::ZERO,
        radius: 2.,
        strength: -5.,
        material: 2,
        write_material: true,
    };
    let submission = terrain.apply_edit(edit, EditOptions::default(), callback);
    assert_eq!(EditSubmission::Applied { chunks: 1 }, submission);
    terrain.flush(&mut host);

    assert_eq!(-5., terrain.try_get_voxel(Vec3::ZERO).density());
    let field = terrain.chunks()[0].field().unwrap();
    let solid = field.voxels().iter().filter(|v| v.is_solid()).count();
    assert!(solid >= 8, "only {solid} voxels turned solid");

    let calls = calls.lock().unwrap();
    assert_eq!(1, calls.len());
    assert_eq!(solid as i32, calls[0][2]);
    assert_eq!(0, calls[0][0]);
}

#[test]
fn out_of_range_queries_are_empty() {
    let (terrain, _) = generated(config(8, [2, 1, 1]), 2.5);
    assert!(terrain.try_get_voxel(Vec3::new(1., 0., 1.)).is_solid());
    assert_eq!(Voxel::EMPTY, terrain.try_get_voxel(Vec3::new(-1., 0., 1.)));
    assert_eq!(Voxel::EMPTY, terrain.try_get_voxel(Vec3::new(1., 100., 1.)));
    assert_eq!(Voxel::EMPTY, terrain.try_get_voxel(Vec3::new(13., 0., 1.)));

    let empty = Terrain::new(config(8, [1, 1, 1])).unwrap();
    assert_eq!(Voxel::EMPTY, empty.try_get_voxel(Vec3::ONE));
}

#[test]
fn neighbouring_chunks_stitch_without_overlap() {
    let (terrain, host) = generated(config(8, [2, 1, 1]), 2.5);
    // A flat plane crosses 6x6 owned lattice edges in every chunk
    assert_eq!(vec![72, 72], host.triangles);
    assert!(terrain
        .chunks()
        .iter()
        .all(|c| c.state() == ChunkState::Ready));
}

#[test]
fn edits_on_a_meshing_chunk_are_serialized() {
    let config = TerrainConfig {
        mesh_jobs_per_frame: 1,
        ..config(8, [1, 1, 1])
    };
    let (mut terrain, mut host) = generated(config, 2.5);
    let center = Vec3::new(2., 4., 2.);
    let before = terrain.try_get_voxel(center).density();

    let first = terrain.apply_edit(dig(center, -1.), EditOptions::default(), None);
    assert_eq!(EditSubmission::Applied { chunks: 1 }, first);

    // The only handler is spoken for, so the second edit has to wait
    let remember = EditOptions {
        never_forget: true,
        ..Default::default()
    };
    assert_eq!(
        EditSubmission::Deferred,
        terrain.apply_edit(dig(center, -1.), remember, None)
    );
    assert_eq!(
        EditSubmission::Rejected,
        terrain.apply_edit(dig(center, -1.), EditOptions::default(), None)
    );
    assert_eq!(1, terrain.stats().deferred_edits);

    // The deferred edit runs once the first one is meshed
    terrain.flush(&mut host);
    assert_eq!(before - 2., terrain.try_get_voxel(center).density());
    assert_eq!(0, terrain.chunks()[0].pending_edits());
    assert_eq!(ChunkState::Ready, terrain.chunks()[0].state());
    assert_eq!(
        EditSubmission::Applied { chunks: 1 },
        terrain.apply_edit(dig(center, -1.), EditOptions::default(), None)
    );
}

#[test]
fn a_burst_of_edits_takes_one_slot_per_chunk() {
    let (mut terrain, mut host) = generated(config(8, [1, 1, 1]), 2.5);
    let center = Vec3::new(2., 2., 2.);
    let before = terrain.try_get_voxel(center).density();

    let applied = (0..100)
        .map(|_| terrain.apply_edit(dig(center, 0.25), EditOptions::default(), None))
        .filter(|s| matches!(s, EditSubmission::Applied { .. }))
        .count();
    assert_eq!(1, applied);
    assert_eq!(1, terrain.chunks()[0].pending_edits());

    let remember = EditOptions {
        never_forget: true,
        ..Default::default()
    };
    for _ in 0..3 {
        assert_eq!(
            EditSubmission::Deferred,
            terrain.apply_edit(dig(center, 0.25), remember, None)
        );
    }
    assert_eq!(1, terrain.chunks()[0].pending_edits());

    terrain.flush(&mut host);
    assert_eq!(before + 1., terrain.try_get_voxel(center).density());
    assert!(terrain.is_idle());
}

#[test]
fn counters_fire_once_after_every_chunk() {
    let (mut terrain, mut host) = generated(config(8, [2, 1, 1]), 2.5);
    let (calls, callback) = recorder();
    let edit = SetDensityEdit {
        center: Vec3::new(6., 1., 3.),
        radius: 2.,
        target_density: 1.,
    };
    let submission = terrain.apply_edit(edit, EditOptions::default(), callback);
    assert_eq!(EditSubmission::Applied { chunks: 2 }, submission);

    terrain.tick(&mut host);
    terrain.flush(&mut host);
    let calls = calls.lock().unwrap();
    assert_eq!(1, calls.len());
    assert!(calls[0][1] < 0, "carving should remove material 1");
    assert!(calls[0].iter().enumerate().all(|(m, d)| m == 1 || *d == 0));
}

#[test]
fn edit_outside_the_grid_reports_no_chunks() {
    let (mut terrain, _) = generated(config(8, [1, 1, 1]), 2.5);
    let (calls, callback) = recorder();
    let submission = terrain.apply_edit(
        dig(Vec3::splat(500.), -1.),
        EditOptions::default(),
        callback,
    );
    assert_eq!(EditSubmission::NoChunks, submission);
    let calls = calls.lock().unwrap();
    assert_eq!(1, calls.len());
    assert!(calls[0].iter().all(|d| *d == 0));
}

#[test]
fn symmetric_edits_wait_for_busy_chunks() {
    let (mut terrain, mut host) = generated(config(8, [2, 1, 1]), 2.5);
    let symmetric = EditOptions {
        symmetric: true,
        ..Default::default()
    };

    // Keep chunk 0 busy with an edit of its own
    terrain.apply_edit(dig(Vec3::new(1., 2., 3.), -1.), EditOptions::default(), None);
    let (calls, callback) = recorder();
    let submission = terrain.apply_edit(dig(Vec3::new(6., 2., 3.), -1.), symmetric, callback);
    assert_eq!(EditSubmission::Deferred, submission);

    terrain.flush(&mut host);
    assert_eq!(1, calls.lock().unwrap().len());
    assert!(terrain.try_get_voxel(Vec3::new(6., 3., 3.)).density() < 0.5);
}

#[test]
fn symmetric_edits_escalate_after_retries() {
    let config = TerrainConfig {
        max_symmetric_retries: 0,
        ..config(8, [2, 1, 1])
    };
    let (mut terrain, mut host) = generated(config, 2.5);
    let symmetric = EditOptions {
        symmetric: true,
        ..Default::default()
    };
    terrain.apply_edit(dig(Vec3::new(1., 2., 3.), -1.), EditOptions::default(), None);
    let submission = terrain.apply_edit(dig(Vec3::new(6., 2., 3.), -1.), symmetric, None);
    assert_eq!(EditSubmission::Applied { chunks: 2 }, submission);
    terrain.flush(&mut host);
}

#[test]
fn immediate_edits_publish_in_the_same_tick() {
    let (mut terrain, mut host) = generated(config(8, [1, 1, 1]), 2.5);
    let uploads = host.uploads.len();
    let immediate = EditOptions {
        immediate: true,
        ..Default::default()
    };
    let center = Vec3::new(3., 2., 3.);
    terrain.apply_edit(dig(center, 2.), immediate, None);
    terrain.tick(&mut host);
    assert_eq!(uploads + 1, host.uploads.len());
    assert_eq!(0, terrain.stats().busy_handlers);
    assert!(!terrain.try_get_voxel(center).is_solid());
}

#[test]
fn immediate_edit_keeps_its_budget_behind_a_normal_one() {
    let config = TerrainConfig {
        max_symmetric_retries: 0,
        ..config(8, [1, 1, 1])
    };
    let (mut terrain, mut host) = generated(config, 2.5);
    let uploads = host.uploads.len();
    let urgent = Vec3::new(5., 2., 5.);
    let before = terrain.try_get_voxel(urgent).density();

    terrain.apply_edit(dig(Vec3::new(2., 2., 2.), 1.), EditOptions::default(), None);
    // Escalates onto the chunk right away, behind the first edit
    let options = EditOptions {
        symmetric: true,
        immediate: true,
        ..Default::default()
    };
    assert_eq!(
        EditSubmission::Applied { chunks: 1 },
        terrain.apply_edit(dig(urgent, 1.), options, None)
    );
    assert_eq!(2, terrain.chunks()[0].pending_edits());

    let mut ticks = 0;
    while host.uploads.len() == uploads {
        terrain.tick(&mut host);
        ticks += 1;
        assert!(ticks < 100);
    }
    // The immediate edit is published no later than the tick after the first one
    if host.uploads.len() == uploads + 1 {
        terrain.tick(&mut host);
    }
    assert_eq!(uploads + 2, host.uploads.len());
    assert_eq!(before + 1., terrain.try_get_voxel(urgent).density());
}

#[test]
fn collision_bakes_are_installed() {
    let (mut terrain, mut host) = generated(config(8, [2, 1, 1]), 2.5);
    assert_eq!(2, host.bakes_started.len());
    assert_eq!(2, terrain.stats().pending_bakes);

    terrain.tick(&mut host);
    terrain.tick(&mut host);
    assert_eq!(2, host.colliders.len());
    assert_eq!(0, terrain.stats().pending_bakes);

    // A chunk without collisions is remeshed but never asks for a bake
    terrain.set_collisions(ChunkPosition::new(1, 0, 0), false);
    let uploads = host.uploads.iter().filter(|&&c| c == 1).count();
    terrain.apply_edit(dig(Vec3::new(11., 2., 3.), 1.), EditOptions::default(), None);
    terrain.shutdown(&mut host);
    assert_eq!(uploads + 1, host.uploads.iter().filter(|&&c| c == 1).count());
    assert_eq!(1, host.bakes_for(1));
}

#[test]
fn shutdown_waits_for_bakes() {
    let config = config(8, [1, 1, 1]);
    let mut host = RecordingHost::new(1);
    let mut terrain = Terrain::new(config).unwrap();
    terrain.generate_with(Arc::new(FlatGenerator {
        height: 2.5,
        material: 1,
    }));
    terrain.shutdown(&mut host);
    assert!(terrain.is_idle());
    assert_eq!(0, terrain.stats().pending_bakes);
    assert_eq!(1, host.colliders.len());
}

#[test]
fn generation_callback_fires_once() {
    let config = config(8, [2, 1, 2]);
    let mut host = RecordingHost::new(config.chunk_count());
    let mut terrain = Terrain::new(config).unwrap();
    let fired = Arc::new(Mutex::new(0));
    let counter = fired.clone();
    terrain.on_generated(Box::new(move || *counter.lock().unwrap() += 1));
    terrain.generate_with(Arc::new(FlatGenerator {
        height: 2.5,
        material: 1,
    }));
    assert_eq!(4, terrain.stats().generating_chunks);

    terrain.flush(&mut host);
    terrain.apply_edit(dig(Vec3::new(2., 2., 2.), -1.), EditOptions::default(), None);
    terrain.flush(&mut host);
    assert_eq!(1, *fired.lock().unwrap());
}

#[test]
fn saved_map_roundtrip() {
    let config = config(8, [2, 2, 1]);
    let (mut terrain, mut host) = generated(config.clone(), 4.5);
    terrain.apply_edit(dig(Vec3::new(6., 5., 3.), -2.), EditOptions::default(), None);
    terrain.flush(&mut host);
    let map = terrain.save_map().unwrap();

    let mut loaded = Terrain::new(config).unwrap();
    let mut other_host = RecordingHost::new(4);
    loaded.load_map(&map).unwrap();
    loaded.flush(&mut other_host);
    assert!(loaded.is_generated());
    for (a, b) in terrain.chunks().iter().zip(loaded.chunks()) {
        assert_eq!(a.field(), b.field());
        assert_eq!(a.material_counts(), b.material_counts());
    }
    assert_eq!(host.triangles, other_host.triangles);
}

#[test]
fn mismatched_map_leaves_terrain_ungenerated() {
    let (terrain, _) = generated(config(8, [2, 2, 1]), 4.5);
    let map = terrain.save_map().unwrap();

    let (mut other, _) = generated(config(8, [2, 1, 2]), 4.5);
    let result = other.load_map(&map);
    assert!(matches!(result, Err(TerrainError::ConfigMismatch { .. })));
    assert!(other
        .chunks()
        .iter()
        .all(|c| c.state() == ChunkState::Unloaded && c.field().is_none()));
    assert!(!other.is_generated());
    assert_eq!(
        Err(TerrainError::NotGenerated { chunk: 0 }),
        other.save_map().map(|_| ())
    );
}
