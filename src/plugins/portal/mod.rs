use bevy::{
    pbr::NotShadowCaster,
    prelude::*,
    reflect::FromReflect,
    render::{
        camera::{CameraProjectionPlugin, Projection, RenderTarget},
        render_resource::{
            Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        },
        view::{update_frusta, RenderLayers},
    },
    transform::TransformSystem,
};
use bevy_rapier3d::prelude::*;
use iyes_loopless::prelude::*;

pub mod camera_projection;
pub mod compositor;
pub mod entity;
pub mod geometry;
pub mod material;
pub mod pair;
pub mod placement;
pub mod render;
pub mod teleport;

use camera_projection::PortalCameraProjection;
use compositor::ViewCompositor;
use entity::{Portal, PortalColor, PortalVisuals, PORTAL_HEIGHT, PORTAL_WIDTH, SENSOR_DEPTH};
use geometry::ViewCamera;
use material::PortalViewMaterial;
use pair::{PlacementOutcome, PortalPair};
use placement::{validate_placement, Placement, PlacementRequest, Surface, SurfaceLookup};
use render::PortalRenderer;
use teleport::{SensorContact, Teleporter};

use super::{
    clock::{tick_due, FrameClock},
    first_person_controller::{FirstPersonCamera, FirstPersonController},
    input::InputLabels,
    physics::*,
};
use crate::util::config::GameConfig;

/// Render layer of the portal meshes, only seen by the player camera.
pub(crate) const PORTAL_LAYER: u8 = 1;
/// First of the per color layers holding the portal meshes seen by portal cameras.
const NESTED_VIEW_LAYER: u8 = 2;

#[derive(Debug)]
pub struct PortalPlugin;

#[derive(Debug, Resource)]
struct PortalResources {
    mesh: Handle<Mesh>,
    /// Solid overlays shown while a portal has no destination.
    closed_materials: [Handle<StandardMaterial>; 2],
    /// Two textures per portal color: the portal camera draws into one while the nested view
    /// samples the other.
    render_targets: [[Handle<Image>; 2]; 2],
    view_materials: [[Handle<PortalViewMaterial>; 2]; 2],
}

/// Anything able to go through portals.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalTeleport;

/// Surface portals can be shot on.
#[derive(Debug, Component, Clone, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct PortalHost;

#[derive(Debug, Component, Clone, Copy)]
pub struct PortalSensor;

/// Solid mesh covering a portal without destination.
#[derive(Debug, Component, Clone, Copy)]
pub struct PortalOverlay;

/// Mesh showing the view through a linked portal. The nested one is seen through portals and
/// shows the previous frame.
#[derive(Debug, Component, Clone, Copy)]
pub struct PortalView {
    pub color: PortalColor,
    pub nested: bool,
}

/// Camera rendering what can be seen through a portal.
#[derive(Debug, Component, Clone, Copy)]
pub struct PortalCamera(pub PortalColor);

#[derive(Debug, SystemLabel)]
pub enum PortalLabels {
    PlacePortals,
    SensorContacts,
    TeleportEntities,
    SyncPortals,
    ComposeViews,
}

#[derive(Debug, StageLabel)]
pub enum PortalStages {
    /// Runs once the physics step has been written back to the scene.
    Teleport,
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        let max_recursion = app
            .world
            .get_resource::<GameConfig>()
            .map_or(render::DEFAULT_MAX_RECURSION, |config| config.max_recursion_depth);

        app.add_plugin(MaterialPlugin::<PortalViewMaterial>::default())
            .add_plugin(CameraProjectionPlugin::<PortalCameraProjection>::default())
            .register_type::<PortalTeleport>()
            .register_type::<PortalHost>()
            .init_resource::<PortalPair>()
            .init_resource::<Teleporter>()
            .insert_resource(PortalRenderer { max_recursion })
            .add_startup_system(load_portal_assets)
            .add_system(
                place_portals
                    .label(PortalLabels::PlacePortals)
                    .after(InputLabels::FirePortals),
            )
            .add_stage_after(
                PhysicsStages::Writeback,
                PortalStages::Teleport,
                SystemStage::parallel(),
            )
            .add_system_to_stage(
                PortalStages::Teleport,
                handle_sensor_contacts.label(PortalLabels::SensorContacts),
            )
            .add_system_to_stage(
                PortalStages::Teleport,
                teleport_entities
                    .run_if(tick_due)
                    .label(PortalLabels::TeleportEntities)
                    .after(PortalLabels::SensorContacts),
            )
            .add_system_to_stage(
                PortalStages::Teleport,
                sync_portals
                    .label(PortalLabels::SyncPortals)
                    .after(PortalLabels::TeleportEntities),
            )
            .add_system_to_stage(
                PortalStages::Teleport,
                compose_portal_views
                    .label(PortalLabels::ComposeViews)
                    .after(PortalLabels::SyncPortals),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                update_frusta::<PortalCameraProjection>
                    .after(TransformSystem::TransformPropagate),
            );
    }
}

/// Load the assets required to render the portals.
fn load_portal_assets(
    mut commands: Commands,
    config: Option<Res<GameConfig>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut portal_materials: ResMut<Assets<PortalViewMaterial>>,
    mut std_materials: ResMut<Assets<StandardMaterial>>,
    mut images: ResMut<Assets<Image>>,
) {
    let [width, height] = config.map_or(GameConfig::default().portal_view_size, |config| {
        config.portal_view_size
    });
    let mesh = meshes.add(
        shape::Quad {
            size: Vec2::new(PORTAL_WIDTH, PORTAL_HEIGHT),
            flip: false,
        }
        .into(),
    );

    let closed_materials = PortalColor::ALL.map(|color| {
        std_materials.add(StandardMaterial {
            base_color: color.tint(),
            unlit: true,
            ..default()
        })
    });

    let mut render_target = || {
        let size = Extent3d {
            width,
            height,
            ..default()
        };
        let mut image = Image {
            texture_descriptor: TextureDescriptor {
                label: None,
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Bgra8UnormSrgb,
                usage: TextureUsages::TEXTURE_BINDING
                    | TextureUsages::COPY_DST
                    | TextureUsages::RENDER_ATTACHMENT,
            },
            ..default()
        };
        image.resize(size);
        images.add(image)
    };
    let render_targets = PortalColor::ALL.map(|_| [render_target(), render_target()]);

    let view_materials = render_targets.clone().map(|buffers| {
        buffers.map(|view| portal_materials.add(PortalViewMaterial { view }))
    });

    commands.insert_resource(PortalResources {
        mesh,
        closed_materials,
        render_targets,
        view_materials,
    });
}

/// Spawn everything a new portal shows itself with. Transforms and visibility get set by
/// [`sync_portals`].
fn spawn_portal_visuals(
    commands: &mut Commands,
    res: &PortalResources,
    color: PortalColor,
) -> PortalVisuals {
    let i = color.index();
    let sensor = commands
        .spawn((
            TransformBundle::default(),
            Collider::cuboid(PORTAL_WIDTH / 2., PORTAL_HEIGHT / 2., SENSOR_DEPTH / 2.),
            Sensor,
            ActiveEvents::COLLISION_EVENTS,
            ActiveCollisionTypes::all(),
            // Filters get opened once the portal is linked.
            CollisionGroups::new(PORTAL_GROUP, Group::NONE),
            PortalSensor,
            Name::from(format!("{color:?} portal sensor")),
        ))
        .id();
    let overlay = commands
        .spawn((
            PbrBundle {
                mesh: res.mesh.clone(),
                material: res.closed_materials[i].clone(),
                ..default()
            },
            RenderLayers::layer(PORTAL_LAYER),
            NotShadowCaster,
            PortalOverlay,
            Name::from(format!("{color:?} portal overlay")),
        ))
        .id();
    let mut spawn_view = |nested: bool| {
        let (layers, name) = if nested {
            (RenderLayers::layer(nested_view_layer(color)), "nested view")
        } else {
            (RenderLayers::layer(PORTAL_LAYER), "view")
        };
        commands
            .spawn((
                MaterialMeshBundle {
                    mesh: res.mesh.clone(),
                    material: res.view_materials[i][usize::from(nested)].clone(),
                    visibility: Visibility { is_visible: false },
                    ..default()
                },
                layers,
                NotShadowCaster,
                PortalView { color, nested },
                Name::from(format!("{color:?} portal {name}")),
            ))
            .id()
    };
    let view = spawn_view(false);
    let nested_view = spawn_view(true);
    let camera = commands
        .spawn((
            Camera3dBundle {
                camera: Camera {
                    // Render before the main camera.
                    priority: -1 - i as isize,
                    target: RenderTarget::Image(res.render_targets[i][0].clone()),
                    is_active: false,
                    ..default()
                },
                ..default()
            },
            PortalCameraProjection::default(),
            VisibilityBundle::default(),
            RenderLayers::default(),
            PortalCamera(color),
            Name::from(format!("{color:?} portal camera")),
        ))
        .remove::<Projection>()
        .id();

    PortalVisuals {
        sensor,
        overlay,
        view,
        nested_view,
        camera,
    }
}

fn nested_view_layer(color: PortalColor) -> u8 {
    NESTED_VIEW_LAYER + color.index() as u8
}

/// Layers rendered by the camera of the `color` portal: the scene, plus the nested views of the
/// portals the compositor found inside its view.
fn portal_camera_layers(compositor: &ViewCompositor, color: PortalColor) -> RenderLayers {
    compositor
        .nested_views(color)
        .fold(RenderLayers::default(), |layers, inner| {
            layers.with(nested_view_layer(inner))
        })
}

struct SceneSurfaces<'a, 'w, 's> {
    hosts: &'a Query<'w, 's, (), With<PortalHost>>,
    pair: &'a PortalPair,
}

impl<'a, 'w, 's> SurfaceLookup for SceneSurfaces<'a, 'w, 's> {
    fn surface(&self, entity: Entity) -> Surface {
        if let Some(portal) = self.pair.portal_for_sensor(entity) {
            Surface::Portal(portal.color)
        } else if self.hosts.contains(entity) {
            Surface::PortalHost
        } else {
            Surface::Other
        }
    }
}

fn place_portals(
    mut commands: Commands,
    mut requests: EventReader<PlacementRequest>,
    mut pair: ResMut<PortalPair>,
    res: Option<Res<PortalResources>>,
    physics: RapierWorld,
    hosts: Query<(), With<PortalHost>>,
) {
    let Some(res) = res else {
        return;
    };
    for request in requests.iter() {
        let placement = validate_placement(
            &physics,
            &SceneSurfaces {
                hosts: &hosts,
                pair: &pair,
            },
            request,
        );
        match placement {
            Placement::Accepted { pose, host } => {
                let outcome = pair.place_portal(pose, host, request.color, |color| {
                    spawn_portal_visuals(&mut commands, &res, color)
                });
                match outcome {
                    PlacementOutcome::Created => {
                        info!("{:?} portal opened at {}", request.color, pose.translation)
                    }
                    PlacementOutcome::Moved => {
                        info!("{:?} portal moved to {}", request.color, pose.translation)
                    }
                }
            }
            Placement::Rejected(rejection) => {
                debug!("{:?} portal shot rejected: {rejection:?}", request.color);
            }
        }
    }
}

fn handle_sensor_contacts(
    mut collisions: EventReader<CollisionEvent>,
    mut teleporter: ResMut<Teleporter>,
    pair: Res<PortalPair>,
    mut physics: RapierWorld,
    travelers: Query<(), With<PortalTeleport>>,
) {
    for collision in collisions.iter() {
        let contact = match *collision {
            CollisionEvent::Started(a, b, _) => SensorContact {
                a,
                b,
                started: true,
            },
            CollisionEvent::Stopped(a, b, _) => SensorContact {
                a,
                b,
                started: false,
            },
        };
        teleporter.on_contact(contact, &pair, &mut physics, |entity| {
            travelers.contains(entity)
        });
    }
}

fn teleport_entities(
    clock: Res<FrameClock>,
    pair: Res<PortalPair>,
    mut teleporter: ResMut<Teleporter>,
    mut physics: RapierWorld,
    mut travelers: Query<
        (
            &mut Transform,
            Option<&mut Velocity>,
            Option<&mut FirstPersonController>,
        ),
        (With<PortalTeleport>, Without<Sensor>),
    >,
    mut anchors: Query<&mut Transform, (Without<PortalTeleport>, Without<Sensor>)>,
) {
    let crossing: Vec<Entity> = teleporter.travelers().collect();
    for entity in crossing {
        let Ok((mut transform, velocity, controller)) = travelers.get_mut(entity) else {
            continue;
        };
        let relocation = match teleporter.advance(entity, &transform, &pair) {
            Ok(Some(relocation)) => relocation,
            Ok(None) => continue,
            Err(err) => {
                error!("Cannot teleport {entity:?}: {err}");
                continue;
            }
        };

        *transform = relocation.transform;
        if let Some(mut velocity) = velocity {
            velocity.linvel = relocation.rotation * velocity.linvel;
            velocity.angvel = relocation.rotation * velocity.angvel;
        }
        if let Some(mut controller) = controller {
            let velocity = controller.realign(relocation.rotation);
            match anchors.get_mut(controller.camera_anchor) {
                Ok(mut anchor) => controller.orient(&mut transform, &mut anchor),
                Err(_) => transform.rotation = controller.body_rotation(),
            }
            // Keep going for the rest of the tick on the other side.
            let outcome = physics.correct_movement(entity, &transform, velocity * clock.delta());
            transform.translation += outcome.translation;
        }
        info!(
            "{entity:?} came out of the {:?} portal at {}",
            relocation.to, transform.translation
        );
    }
}

fn sync_portals(
    pair: Res<PortalPair>,
    mut physics: RapierWorld,
    mut overlays: Query<
        (&mut Transform, &mut Visibility),
        (With<PortalOverlay>, Without<PortalView>, Without<Sensor>),
    >,
    mut views: Query<
        (&mut Transform, &mut Visibility),
        (With<PortalView>, Without<PortalOverlay>, Without<Sensor>),
    >,
) {
    pair.per_frame_sync(&mut physics, |portal: &Portal| {
        if let Ok((transform, visibility)) = overlays.get_mut(portal.visuals.overlay) {
            show(transform, visibility, portal.transform, portal.overlay_visible);
        }
        for view in [portal.visuals.view, portal.visuals.nested_view] {
            if let Ok((transform, visibility)) = views.get_mut(view) {
                show(transform, visibility, portal.transform, !portal.overlay_visible);
            }
        }
    });
}

fn show(mut transform: Mut<Transform>, mut visibility: Mut<Visibility>, pose: Transform, visible: bool) {
    if *transform != pose {
        *transform = pose;
    }
    if visibility.is_visible != visible {
        visibility.is_visible = visible;
    }
}

/// Where the player camera is this frame. Its global transform is only propagated later on.
fn main_view(
    players: &Query<(&Transform, &FirstPersonController), Without<PortalCamera>>,
    anchors: &Query<&Transform, (Without<FirstPersonController>, Without<PortalCamera>)>,
    projections: &Query<&Projection, With<FirstPersonCamera>>,
) -> Option<ViewCamera> {
    let (player, controller) = players.iter().next()?;
    let anchor = anchors.get(controller.camera_anchor).ok()?;
    let Projection::Perspective(projection) = projections.iter().next()? else {
        return None;
    };
    Some(ViewCamera::perspective(
        *player * *anchor,
        projection.fov,
        projection.aspect_ratio,
        projection.near,
    ))
}

/// Run the portal renderer for the player camera, and point the portal cameras at the views it
/// asks for. Each frame the portal cameras swap textures with the nested views.
fn compose_portal_views(
    renderer: Res<PortalRenderer>,
    pair: Res<PortalPair>,
    res: Option<Res<PortalResources>>,
    mut compositor: Local<ViewCompositor>,
    mut back_buffer: Local<usize>,
    players: Query<(&Transform, &FirstPersonController), Without<PortalCamera>>,
    anchors: Query<&Transform, (Without<FirstPersonController>, Without<PortalCamera>)>,
    projections: Query<&Projection, With<FirstPersonCamera>>,
    mut portal_cameras: Query<(
        &PortalCamera,
        &mut Camera,
        &mut Transform,
        &mut PortalCameraProjection,
        &mut RenderLayers,
    )>,
    mut view_meshes: Query<(&PortalView, &mut Handle<PortalViewMaterial>)>,
) {
    let (Some(res), Some(view)) = (res, main_view(&players, &anchors, &projections)) else {
        return;
    };
    renderer.render_frame(&mut *compositor, &pair, &view);

    *back_buffer = 1 - *back_buffer;
    let drawn = *back_buffer;
    for (mesh, mut material) in &mut view_meshes {
        let buffer = if mesh.nested { 1 - drawn } else { drawn };
        let wanted = &res.view_materials[mesh.color.index()][buffer];
        if *material != *wanted {
            *material = wanted.clone();
        }
    }

    for (PortalCamera(color), mut camera, mut transform, mut projection, mut layers) in
        &mut portal_cameras
    {
        match compositor.view(*color) {
            Some(view) => {
                *transform = view.transform;
                projection.follow(view);
                let target = res.render_targets[color.index()][drawn].clone();
                camera.target = RenderTarget::Image(target);
                camera.is_active = true;
                let wanted = portal_camera_layers(&compositor, *color);
                if *layers != wanted {
                    *layers = wanted;
                }
            }
            None => {
                if camera.is_active {
                    camera.is_active = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::portal::entity::tests::{facing, visuals};

    fn composite(pair: &PortalPair, max_recursion: u8) -> ViewCompositor {
        let camera =
            ViewCamera::perspective(facing(Vec3::new(0., 0., 10.), Vec3::NEG_Z), 1.5, 2., 0.1);
        let mut compositor = ViewCompositor::default();
        PortalRenderer { max_recursion }.render_frame(&mut compositor, pair, &camera);
        compositor
    }

    #[test]
    fn portal_cameras_render_nested_views_past_the_first_level() {
        let mut pair = PortalPair::default();
        let wall = Entity::from_raw(100);
        pair.place_portal(facing(Vec3::ZERO, Vec3::NEG_Z), wall, PortalColor::Blue, |_| {
            visuals(1)
        });
        pair.place_portal(
            facing(Vec3::new(0., 0., 20.), Vec3::Z),
            wall,
            PortalColor::Orange,
            |_| visuals(2),
        );

        let flat = composite(&pair, 0);
        assert_eq!(portal_camera_layers(&flat, PortalColor::Blue), RenderLayers::layer(0));

        let nested = composite(&pair, 1);
        let layers = portal_camera_layers(&nested, PortalColor::Blue);
        assert_eq!(
            layers,
            RenderLayers::layer(0).with(nested_view_layer(PortalColor::Blue))
        );
        // The meshes sampling this frame's textures stay out of the portal cameras.
        assert!(!layers.intersects(&RenderLayers::layer(PORTAL_LAYER)));
        assert_eq!(portal_camera_layers(&nested, PortalColor::Orange), RenderLayers::layer(0));
    }

    #[test]
    fn nested_view_layers_are_distinct() {
        let [blue, orange] = PortalColor::ALL.map(nested_view_layer);
        assert_ne!(blue, orange);
        assert!(![blue, orange].contains(&PORTAL_LAYER));
        assert!(![blue, orange].contains(&0));
    }
}
