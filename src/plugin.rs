//! Runs the terrain inside a bevy [App]

use std::marker::PhantomData;

use bevy::log::error;
use bevy::prelude::*;

use crate::{Terrain, TerrainConfig, TerrainHost};

/// Inserts a [Terrain] resource built from `config` and ticks it once per frame against the host
/// resource `H`. The app has to insert `H` itself
pub struct VoxelTerrainPlugin<H> {
    config: TerrainConfig,
    _host: PhantomData<fn() -> H>,
}

impl<H> VoxelTerrainPlugin<H> {
    /// A plugin for a terrain with the given config
    pub fn new(config: TerrainConfig) -> Self {
        Self {
            config,
            _host: PhantomData,
        }
    }
}

impl<H: TerrainHost + Resource> Plugin for VoxelTerrainPlugin<H> {
    fn build(&self, app: &mut App) {
        match Terrain::new(self.config.clone()) {
            Ok(terrain) => {
                app.insert_resource(terrain)
                    .add_systems(Update, tick_terrain::<H>);
            }
            Err(e) => error!("Voxel terrain disabled: {e}"),
        }
    }
}

fn tick_terrain<H: TerrainHost + Resource>(mut terrain: ResMut<Terrain>, host: Option<ResMut<H>>) {
    if let Some(mut host) = host {
        terrain.tick(&mut *host);
    }
}

#[test]
fn test_plugin_ticks_terrain() {
    use crate::{MeshDescription, MeshId};

    #[derive(Resource, Default)]
    struct CountingHost {
        uploads: usize,
    }

    impl TerrainHost for CountingHost {
        fn upload_mesh(&mut self, _chunk: usize, _mesh: &MeshDescription) -> MeshId {
            self.uploads += 1;
            MeshId(self.uploads as u64)
        }
        fn begin_collision_bake(&mut self, _mesh: MeshId) {}
        fn is_bake_complete(&mut self, _mesh: MeshId) -> bool {
            true
        }
        fn install_collider(&mut self, _chunk: usize, _mesh: MeshId) {}
    }

    let config = TerrainConfig {
        chunk_size: 8,
        grid_size: [1, 1, 1],
        max_mesh_frames: 0,
        ..Default::default()
    };
    let mut app = App::new();
    app.init_resource::<CountingHost>()
        .add_plugins(VoxelTerrainPlugin::<CountingHost>::new(config));
    app.world
        .resource_mut::<Terrain>()
        .generate_with(std::sync::Arc::new(crate::FlatGenerator {
            height: 2.,
            material: 1,
        }));

    for _ in 0..200 {
        app.update();
        if app.world.resource::<Terrain>().is_generated() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(app.world.resource::<Terrain>().is_generated());
    assert_eq!(1, app.world.resource::<CountingHost>().uploads);
}
