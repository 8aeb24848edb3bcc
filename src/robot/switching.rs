// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the controller claims and the pieces of the controller switch lifecycle.
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};

use num_traits::FromPrimitive;

use crate::exception::{create_conflict_exception, FrankaResult};
use crate::robot::control_types::ControlMode;

pub const EFFORT_JOINT_INTERFACE: &str = "hardware_interface::EffortJointInterface";
pub const POSITION_JOINT_INTERFACE: &str = "hardware_interface::PositionJointInterface";
pub const VELOCITY_JOINT_INTERFACE: &str = "hardware_interface::VelocityJointInterface";
pub const JOINT_STATE_INTERFACE: &str = "hardware_interface::JointStateInterface";
pub const FRANKA_POSE_CARTESIAN_INTERFACE: &str = "franka_hw::FrankaPoseCartesianInterface";
pub const FRANKA_VELOCITY_CARTESIAN_INTERFACE: &str = "franka_hw::FrankaVelocityCartesianInterface";
pub const FRANKA_STATE_INTERFACE: &str = "franka_hw::FrankaStateInterface";
pub const FRANKA_MODEL_INTERFACE: &str = "franka_hw::FrankaModelInterface";

/// Kind of an interface a controller can claim.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InterfaceKind {
    /// Produces commands of the given mode.
    Command(ControlMode),
    /// Only reads state or model data.
    ReadOnly,
}

impl InterfaceKind {
    /// Looks up an interface by its name, `None` for unknown interfaces.
    pub fn parse(interface: &str) -> Option<Self> {
        match interface {
            EFFORT_JOINT_INTERFACE => Some(InterfaceKind::Command(ControlMode::Torque)),
            POSITION_JOINT_INTERFACE => Some(InterfaceKind::Command(ControlMode::JointPosition)),
            VELOCITY_JOINT_INTERFACE => Some(InterfaceKind::Command(ControlMode::JointVelocity)),
            FRANKA_POSE_CARTESIAN_INTERFACE => {
                Some(InterfaceKind::Command(ControlMode::CartesianPose))
            }
            FRANKA_VELOCITY_CARTESIAN_INTERFACE => {
                Some(InterfaceKind::Command(ControlMode::CartesianVelocity))
            }
            JOINT_STATE_INTERFACE | FRANKA_STATE_INTERFACE | FRANKA_MODEL_INTERFACE => {
                Some(InterfaceKind::ReadOnly)
            }
            _ => None,
        }
    }
}

/// Resources one controller claims through one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceClaim {
    pub hardware_interface: String,
    pub resources: BTreeSet<String>,
}

impl InterfaceClaim {
    pub fn new<I, S>(hardware_interface: &str, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InterfaceClaim {
            hardware_interface: hardware_interface.to_string(),
            resources: resources.into_iter().map(Into::into).collect(),
        }
    }
    /// A read-only interface. Reading does not claim resources.
    pub fn read_only(hardware_interface: &str) -> Self {
        InterfaceClaim {
            hardware_interface: hardware_interface.to_string(),
            resources: BTreeSet::new(),
        }
    }
}

/// The set of hardware resources and interfaces one controller requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerClaim {
    pub name: String,
    pub claimed_resources: Vec<InterfaceClaim>,
}

impl ControllerClaim {
    pub fn new(name: impl Into<String>, claimed_resources: Vec<InterfaceClaim>) -> Self {
        ControllerClaim {
            name: name.into(),
            claimed_resources,
        }
    }
    fn resources(&self) -> impl Iterator<Item = &BTreeSet<String>> {
        self.claimed_resources.iter().map(|claim| &claim.resources)
    }
    /// Returns true if this and `other` claim at least one common resource.
    pub fn overlaps(&self, other: &ControllerClaim) -> bool {
        self.resources()
            .any(|own| other.resources().any(|theirs| !own.is_disjoint(theirs)))
    }
}

/// Returns true iff two of the `candidates` claim a common resource.
///
/// Does not lock or allocate.
pub fn check_for_conflict(candidates: &[ControllerClaim]) -> bool {
    candidates.iter().enumerate().any(|(i, candidate)| {
        candidates[i + 1..]
            .iter()
            .any(|other| candidate.overlaps(other))
    })
}

/// Determines the single control mode requested by `claims`.
/// # Errors
/// * ConflictException if an interface is unknown or more than one command interface is claimed.
pub fn requested_mode(claims: &[ControllerClaim]) -> FrankaResult<ControlMode> {
    let mut mode = ControlMode::None;
    for claim in claims.iter().flat_map(|controller| controller.claimed_resources.iter()) {
        match InterfaceKind::parse(&claim.hardware_interface) {
            None => {
                return Err(create_conflict_exception(format!(
                    "unknown hardware interface {}",
                    claim.hardware_interface
                )))
            }
            Some(InterfaceKind::ReadOnly) => {}
            Some(InterfaceKind::Command(claimed)) => {
                if mode != ControlMode::None && mode != claimed {
                    return Err(create_conflict_exception(format!(
                        "more than one command interface claimed: {} and {}",
                        mode, claimed
                    )));
                }
                mode = claimed;
            }
        }
    }
    Ok(mode)
}

/// Checks that `claims` only name resources of this arm and that joint-level command interfaces
/// claim all joints.
/// # Errors
/// * ConflictException describing the first invalid claim.
pub fn validate_claims(
    claims: &[ControllerClaim],
    arm_id: &str,
    joint_names: &[String; 7],
) -> FrankaResult<()> {
    let robot = format!("{}_robot", arm_id);
    let model = format!("{}_model", arm_id);
    for controller in claims.iter() {
        for claim in controller.claimed_resources.iter() {
            if let Some(resource) = claim.resources.iter().find(|resource| {
                **resource != robot && **resource != model && !joint_names.contains(resource)
            }) {
                return Err(create_conflict_exception(format!(
                    "controller {} claims unknown resource {}",
                    controller.name, resource
                )));
            }
            let joint_level = matches!(
                InterfaceKind::parse(&claim.hardware_interface),
                Some(InterfaceKind::Command(ControlMode::Torque))
                    | Some(InterfaceKind::Command(ControlMode::JointPosition))
                    | Some(InterfaceKind::Command(ControlMode::JointVelocity))
            );
            if joint_level && !joint_names.iter().all(|joint| claim.resources.contains(joint)) {
                return Err(create_conflict_exception(format!(
                    "controller {} has to claim all joints on {}",
                    controller.name, claim.hardware_interface
                )));
            }
        }
    }
    Ok(())
}

/// Combines the current mode with the modes started and stopped by a switch.
/// # Errors
/// * ConflictException if a different mode is started while the current one keeps running.
pub fn resolve_control_mode(
    current: ControlMode,
    start: ControlMode,
    stop: ControlMode,
) -> FrankaResult<ControlMode> {
    let mut requested = current;
    if stop == requested {
        requested = ControlMode::None;
    }
    if start != ControlMode::None {
        if requested != ControlMode::None && requested != start {
            return Err(create_conflict_exception(format!(
                "cannot start {} while {} is running",
                start, requested
            )));
        }
        requested = start;
    }
    Ok(requested)
}

const ACTIVE_BIT: u8 = 0x80;

/// Armed control mode and active flag, stored in one atomic so that a control cycle always sees
/// a consistent pair.
#[derive(Debug, Default)]
pub struct SwitchState {
    state: AtomicU8,
}

impl SwitchState {
    fn decode(value: u8) -> (ControlMode, bool) {
        let mode = ControlMode::from_u8(value & !ACTIVE_BIT).unwrap_or(ControlMode::None);
        (mode, value & ACTIVE_BIT != 0)
    }
    /// Current mode and active flag.
    pub fn snapshot(&self) -> (ControlMode, bool) {
        SwitchState::decode(self.state.load(Ordering::Acquire))
    }
    pub fn mode(&self) -> ControlMode {
        self.snapshot().0
    }
    pub fn is_active(&self) -> bool {
        self.snapshot().1
    }
    /// Installs `mode` in inactive state.
    pub fn arm(&self, mode: ControlMode) {
        self.state.store(mode as u8, Ordering::Release);
    }
    /// Sets the active flag if a mode is armed.
    /// # Return
    /// Whether the flag is set afterwards.
    pub fn activate(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                match SwitchState::decode(value).0 {
                    ControlMode::None => None,
                    _ => Some(value | ACTIVE_BIT),
                }
            })
            .is_ok()
    }
    pub fn deactivate(&self) {
        self.state.fetch_and(!ACTIVE_BIT, Ordering::AcqRel);
    }
}
