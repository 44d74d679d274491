//! Rigid-body capability used by the table, and the rapier2d world behind it
//!
//! Game logic only talks to [`PhysicsEngine`]. [`TableWorld`] wraps a
//! zero-gravity rapier2d world: balls are dynamic discs with CCD, rails are
//! fixed rotated cuboids. Felt friction is a constant deceleration applied
//! after every step, on top of rapier's linear damping.

use std::collections::HashMap;

use glam::Vec2;
use parking_lot::Mutex;
use rapier2d::prelude::*;

use crate::config::SimConfig;

use super::ball::BallId;

fn to_na(v: Vec2) -> Vector<Real> {
    vector![v.x, v.y]
}

fn from_na(v: &Vector<Real>) -> Vec2 {
    Vec2::new(v.x, v.y)
}

/// Reference to a body owned by the engine. Generational, so a removed
/// handle never aliases a later body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(RigidBodyHandle);

/// What a body represents, reported back in collision events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyLabel {
    Ball(BallId),
    Wall,
}

/// Full kinematic state of one body
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    pub position: Vec2,
    pub angle: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
}

impl Kinematics {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }
}

/// Operations the table needs from a physics engine
pub trait PhysicsEngine {
    /// Add a dynamic circle to the world
    fn create_circle(&mut self, label: BodyLabel, position: Vec2, radius: f32) -> BodyHandle;

    /// Add a static, rotated rectangle to the world
    fn create_rectangle(
        &mut self,
        label: BodyLabel,
        center: Vec2,
        half_extents: Vec2,
        rotation: f32,
    ) -> BodyHandle;

    /// Remove a body. Unknown or already removed handles are ignored.
    fn remove_body(&mut self, body: BodyHandle) -> bool;

    fn contains(&self, body: BodyHandle) -> bool;

    /// Advance the world by a fixed delta, seconds
    fn step(&mut self, dt: f32);

    fn kinematics(&self, body: BodyHandle) -> Option<Kinematics>;

    fn set_kinematics(&mut self, body: BodyHandle, kinematics: Kinematics) -> bool;

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec2) -> bool;

    /// Pairs that started touching since the last drain
    fn drain_collision_starts(&mut self) -> Vec<(BodyLabel, BodyLabel)>;

    /// Scalar speed of every body in the world
    fn body_speeds(&self) -> Vec<f32>;
}

/// Collects contact starts during a pipeline step
#[derive(Default)]
struct ContactCollector {
    started: Mutex<Vec<(ColliderHandle, ColliderHandle)>>,
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        if let CollisionEvent::Started(a, b, _) = event {
            self.started.lock().push((a, b));
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// rapier2d world for a flat table
pub struct TableWorld {
    integration: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    contacts: ContactCollector,
    labels: HashMap<RigidBodyHandle, BodyLabel>,
    started: Vec<(BodyLabel, BodyLabel)>,
    restitution: f32,
    linear_damping: f32,
    rolling_deceleration: f32,
    ball_mass: f32,
}

impl TableWorld {
    pub fn new(sim: &SimConfig) -> Self {
        let mut integration = IntegrationParameters::default();
        integration.dt = sim.physics_dt();
        Self {
            integration,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            contacts: ContactCollector::default(),
            labels: HashMap::new(),
            started: Vec::new(),
            restitution: sim.restitution,
            linear_damping: sim.linear_damping,
            rolling_deceleration: sim.rolling_deceleration,
            ball_mass: if sim.ball_mass > 0.0 { sim.ball_mass } else { 1.0 },
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn collider_label(&self, collider: ColliderHandle) -> Option<BodyLabel> {
        let parent = self.colliders.get(collider)?.parent()?;
        self.labels.get(&parent).copied()
    }

    /// Constant deceleration from the felt. Slow bodies stop dead.
    fn apply_felt_friction(&mut self, dt: f32) {
        let drop = self.rolling_deceleration * dt;
        for (_, rb) in self.bodies.iter_mut() {
            if !rb.is_dynamic() {
                continue;
            }
            let velocity = *rb.linvel();
            let speed = velocity.norm();
            let next = if speed <= drop {
                Vector::zeros()
            } else {
                velocity * ((speed - drop) / speed)
            };
            rb.set_linvel(next, false);
            if rb.angvel().abs() < 1e-4 {
                rb.set_angvel(0.0, false);
            }
        }
    }
}

impl PhysicsEngine for TableWorld {
    fn create_circle(&mut self, label: BodyLabel, position: Vec2, radius: f32) -> BodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(to_na(position))
            .linear_damping(self.linear_damping)
            .angular_damping(self.linear_damping)
            .ccd_enabled(true)
            .build();
        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::ball(radius)
            .restitution(self.restitution)
            .friction(0.0)
            .mass(self.ball_mass)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        self.labels.insert(handle, label);
        BodyHandle(handle)
    }

    fn create_rectangle(
        &mut self,
        label: BodyLabel,
        center: Vec2,
        half_extents: Vec2,
        rotation: f32,
    ) -> BodyHandle {
        let body = RigidBodyBuilder::fixed()
            .position(Isometry::new(to_na(center), rotation))
            .build();
        let handle = self.bodies.insert(body);

        let half = half_extents.abs();
        let collider = ColliderBuilder::cuboid(half.x, half.y)
            .restitution(self.restitution)
            .friction(0.0)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        self.labels.insert(handle, label);
        BodyHandle(handle)
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        self.labels.remove(&body.0);
        self.bodies
            .remove(
                body.0,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    fn contains(&self, body: BodyHandle) -> bool {
        self.bodies.contains(body.0)
    }

    fn step(&mut self, dt: f32) {
        self.integration.dt = dt;
        self.pipeline.step(
            &Vector::zeros(),
            &self.integration,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            None,
            &(),
            &self.contacts,
        );
        self.apply_felt_friction(dt);

        let started = std::mem::take(&mut *self.contacts.started.lock());
        for (a, b) in started {
            let pair = (self.collider_label(a), self.collider_label(b));
            if let (Some(a), Some(b)) = pair {
                self.started.push((a, b));
            }
        }
    }

    fn kinematics(&self, body: BodyHandle) -> Option<Kinematics> {
        self.bodies.get(body.0).map(|rb| Kinematics {
            position: from_na(rb.translation()),
            angle: rb.rotation().angle(),
            velocity: from_na(rb.linvel()),
            angular_velocity: rb.angvel(),
        })
    }

    fn set_kinematics(&mut self, body: BodyHandle, kinematics: Kinematics) -> bool {
        match self.bodies.get_mut(body.0) {
            Some(rb) => {
                rb.set_position(Isometry::new(to_na(kinematics.position), kinematics.angle), true);
                rb.set_linvel(to_na(kinematics.velocity), true);
                rb.set_angvel(kinematics.angular_velocity, true);
                true
            }
            None => false,
        }
    }

    /// Every ball shares one mass, so the impulse maps straight onto velocity.
    /// Fixed bodies accept and ignore it.
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec2) -> bool {
        match self.bodies.get_mut(body.0) {
            Some(rb) => {
                if rb.is_dynamic() {
                    let velocity = *rb.linvel() + to_na(impulse / self.ball_mass);
                    rb.set_linvel(velocity, true);
                }
                true
            }
            None => false,
        }
    }

    fn drain_collision_starts(&mut self) -> Vec<(BodyLabel, BodyLabel)> {
        std::mem::take(&mut self.started)
    }

    fn body_speeds(&self) -> Vec<f32> {
        self.bodies.iter().map(|(_, rb)| rb.linvel().norm()).collect()
    }
}
