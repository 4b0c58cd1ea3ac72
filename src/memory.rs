//! In-memory kinematic backend.
//!
//! No dynamics and no collision checking: bodies are poses, robots are [`k::Chain`]s whose
//! forward kinematics are evaluated on demand. Enough to plan, execute and test the command
//! layer without an external physics engine.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{Unit, Vector3};

use crate::backend::{JointKind, JointSpec, RobotDescription, Rgba, SimBackend};
use crate::error::{Result, TampError};
use crate::geometry::{BodyId, JointId, LinkId, Pose};

/// One link of an articulated body and the `k` node that moves it.
struct MemLink {
    name: String,
    parent: Option<usize>,
    /// Joint connecting this link to its parent; `None` for the root.
    joint: Option<JointSpec>,
    node: k::Node<f64>,
}

impl MemLink {
    fn position(&self) -> f64 {
        self.node.joint_position().unwrap_or(0.0)
    }
}

/// Everything needed to rebuild a link on a fresh kinematic tree.
struct LinkSeed {
    name: String,
    parent: Option<usize>,
    joint: Option<JointSpec>,
    position: f64,
}

fn kinematic_node(name: &str, joint: Option<&JointSpec>) -> k::Node<f64> {
    let builder = k::NodeBuilder::<f64>::new().name(name);
    let Some(joint) = joint else {
        return builder.finalize().into();
    };

    let axis = Unit::new_normalize(Vector3::from(joint.axis));
    let joint_type = match joint.kind {
        JointKind::Revolute => k::JointType::Rotational { axis },
        JointKind::Prismatic => k::JointType::Linear { axis },
        JointKind::Fixed => k::JointType::Fixed,
    };
    let limits = (joint.kind != JointKind::Fixed && joint.lower < joint.upper)
        .then(|| k::joint::Range::new(joint.lower, joint.upper));
    let origin = joint.origin();
    builder
        .joint_type(joint_type)
        .translation(origin.translation)
        .rotation(origin.rotation)
        .limits(limits)
        .finalize()
        .into()
}

/// Builds the `k` tree for `seeds`. Seeds must list every parent before its children.
fn build_tree(seeds: Vec<LinkSeed>) -> Result<(Vec<MemLink>, k::Chain<f64>)> {
    let mut links: Vec<MemLink> = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let node = kinematic_node(&seed.name, seed.joint.as_ref());
        if let Some(parent) = seed.parent {
            let parent = links
                .get(parent)
                .ok_or_else(|| TampError::UnknownLink(format!("parent of '{}'", seed.name)))?;
            node.set_parent(&parent.node);
        }
        if seed.joint.as_ref().is_some_and(|j| j.kind != JointKind::Fixed) {
            node.set_joint_position(seed.position)?;
        }
        links.push(MemLink {
            name: seed.name,
            parent: seed.parent,
            joint: seed.joint,
            node,
        });
    }

    let root = links
        .first()
        .map(|l| l.node.clone())
        .ok_or_else(|| TampError::UnknownLink("empty link list".to_string()))?;
    Ok((links, k::Chain::from_root(root)))
}

fn seeds_of(links: &[MemLink]) -> Vec<LinkSeed> {
    links
        .iter()
        .map(|l| LinkSeed {
            name: l.name.clone(),
            parent: l.parent,
            joint: l.joint.clone(),
            position: l.position(),
        })
        .collect()
}

enum Shape {
    Box {
        extents: [f64; 3],
        color: Rgba,
    },
    Articulated {
        links: Vec<MemLink>,
        chain: k::Chain<f64>,
    },
}

struct MemBody {
    pose: Pose,
    shape: Shape,
    collision_only: bool,
}

/// A scene held entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    bodies: BTreeMap<BodyId, MemBody>,
    next_id: u32,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("bodies", &self.bodies.keys().collect::<Vec<_>>())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the body was created as a collision-only clone.
    pub fn is_collision_only(&self, body: BodyId) -> Result<bool> {
        Ok(self.body(body)?.collision_only)
    }

    /// Full extents and color of a box body, `None` for articulated bodies.
    pub fn box_shape(&self, body: BodyId) -> Result<Option<([f64; 3], Rgba)>> {
        Ok(match &self.body(body)?.shape {
            Shape::Box { extents, color } => Some((*extents, *color)),
            Shape::Articulated { .. } => None,
        })
    }

    fn insert(&mut self, body: MemBody) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, body);
        id
    }

    fn insert_articulated(
        &mut self,
        pose: Pose,
        seeds: Vec<LinkSeed>,
        collision_only: bool,
    ) -> Result<BodyId> {
        let (links, chain) = build_tree(seeds)?;
        Ok(self.insert(MemBody {
            pose,
            shape: Shape::Articulated { links, chain },
            collision_only,
        }))
    }

    fn body(&self, body: BodyId) -> Result<&MemBody> {
        self.bodies.get(&body).ok_or(TampError::UnknownBody(body))
    }

    fn links(&self, body: BodyId) -> Result<&[MemLink]> {
        match &self.body(body)?.shape {
            Shape::Articulated { links, .. } => Ok(links),
            Shape::Box { .. } => Ok(&[]),
        }
    }

    fn link(&self, body: BodyId, link: LinkId) -> Result<&MemLink> {
        self.links(body)?
            .get(link.0)
            .ok_or_else(|| TampError::UnknownLink(format!("{body}:{}", link.0)))
    }

    /// The link moved by `joint`, which must exist.
    fn joint_link(&self, body: BodyId, joint: JointId) -> Result<&MemLink> {
        self.links(body)?
            .get(joint.0)
            .filter(|l| l.joint.is_some())
            .ok_or_else(|| TampError::UnknownJoint(format!("{body}:{}", joint.0)))
    }

    fn joint(&self, body: BodyId, joint: JointId) -> Result<&JointSpec> {
        self.joint_link(body, joint)?
            .joint
            .as_ref()
            .ok_or_else(|| TampError::UnknownJoint(format!("{body}:{}", joint.0)))
    }
}

impl SimBackend for MemoryBackend {
    fn create_box(&mut self, extents: [f64; 3], color: Rgba) -> BodyId {
        self.insert(MemBody {
            pose: Pose::identity(),
            shape: Shape::Box { extents, color },
            collision_only: false,
        })
    }

    fn load_robot(&mut self, description: &RobotDescription) -> Result<BodyId> {
        let mut index: BTreeMap<&str, usize> = BTreeMap::new();
        let mut seeds = Vec::with_capacity(description.links.len());

        for (i, link) in description.links.iter().enumerate() {
            let parent = match &link.parent {
                Some(name) => Some(*index.get(name.as_str()).ok_or_else(|| {
                    TampError::UnknownLink(format!("{}: parent '{name}'", description.name))
                })?),
                None if i == 0 => None,
                None => {
                    return Err(TampError::UnknownLink(format!(
                        "{}: '{}' has no parent",
                        description.name, link.name
                    )))
                }
            };
            let position = link
                .joint
                .as_ref()
                .map_or(0.0, |j| 0.0_f64.clamp(j.lower.min(j.upper), j.upper.max(j.lower)));
            index.insert(link.name.as_str(), i);
            seeds.push(LinkSeed {
                name: link.name.clone(),
                parent,
                joint: link.joint.clone(),
                position,
            });
        }

        let robot = self.insert_articulated(Pose::identity(), seeds, false)?;
        tracing::debug!(robot = %description.name, %robot, "loaded robot");
        Ok(robot)
    }

    fn remove_body(&mut self, body: BodyId) -> Result<()> {
        self.bodies
            .remove(&body)
            .map(|_| ())
            .ok_or(TampError::UnknownBody(body))
    }

    fn pose(&self, body: BodyId) -> Result<Pose> {
        Ok(self.body(body)?.pose)
    }

    fn set_pose(&mut self, body: BodyId, pose: &Pose) -> Result<()> {
        let entry = self
            .bodies
            .get_mut(&body)
            .ok_or(TampError::UnknownBody(body))?;
        entry.pose = *pose;
        Ok(())
    }

    fn joint_from_name(&self, body: BodyId, name: &str) -> Result<JointId> {
        self.links(body)?
            .iter()
            .position(|l| l.joint.as_ref().is_some_and(|j| j.name == name))
            .map(JointId)
            .ok_or_else(|| TampError::UnknownJoint(name.to_string()))
    }

    fn joint_name(&self, body: BodyId, joint: JointId) -> Result<String> {
        Ok(self.joint(body, joint)?.name.clone())
    }

    fn link_from_name(&self, body: BodyId, name: &str) -> Result<LinkId> {
        self.links(body)?
            .iter()
            .position(|l| l.name == name)
            .map(LinkId)
            .ok_or_else(|| TampError::UnknownLink(name.to_string()))
    }

    fn link_name(&self, body: BodyId, link: LinkId) -> Result<String> {
        Ok(self.link(body, link)?.name.clone())
    }

    fn joint_limits(&self, body: BodyId, joint: JointId) -> Result<(f64, f64)> {
        let j = self.joint(body, joint)?;
        Ok((j.lower, j.upper))
    }

    fn joint_position(&self, body: BodyId, joint: JointId) -> Result<f64> {
        Ok(self.joint_link(body, joint)?.position())
    }

    /// Fails for fixed joints and for positions outside the joint limits.
    fn set_joint_position(&mut self, body: BodyId, joint: JointId, position: f64) -> Result<()> {
        self.joint_link(body, joint)?
            .node
            .set_joint_position(position)?;
        Ok(())
    }

    fn joint_parent_link(&self, body: BodyId, joint: JointId) -> Result<LinkId> {
        self.joint_link(body, joint)?
            .parent
            .map(LinkId)
            .ok_or_else(|| TampError::UnknownJoint(format!("{body}:{} is the base", joint.0)))
    }

    fn joint_child_link(&self, body: BodyId, joint: JointId) -> Result<LinkId> {
        self.joint_link(body, joint)?;
        Ok(LinkId(joint.0))
    }

    fn movable_joints(&self, body: BodyId) -> Result<Vec<JointId>> {
        Ok(self
            .links(body)?
            .iter()
            .enumerate()
            .filter(|(_, l)| l.joint.as_ref().is_some_and(|j| j.kind != JointKind::Fixed))
            .map(|(i, _)| JointId(i))
            .collect())
    }

    fn link_pose(&self, body: BodyId, link: LinkId) -> Result<Pose> {
        let entry = self.body(body)?;
        match &entry.shape {
            Shape::Box { .. } if link.0 == 0 => Ok(entry.pose),
            Shape::Box { .. } => Err(TampError::UnknownLink(format!("{body}:{}", link.0))),
            Shape::Articulated { links, chain } => {
                let node = &links
                    .get(link.0)
                    .ok_or_else(|| TampError::UnknownLink(format!("{body}:{}", link.0)))?
                    .node;
                chain.update_transforms();
                let local = node.world_transform().ok_or_else(|| {
                    TampError::UnknownLink(format!("{body}:{} has no transform", link.0))
                })?;
                Ok(entry.pose * local)
            }
        }
    }

    fn link_parent(&self, body: BodyId, link: LinkId) -> Result<Option<LinkId>> {
        Ok(self.link(body, link)?.parent.map(LinkId))
    }

    fn link_children(&self, body: BodyId, link: LinkId) -> Result<Vec<LinkId>> {
        self.link(body, link)?;
        Ok(self
            .links(body)?
            .iter()
            .enumerate()
            .filter(|(_, l)| l.parent == Some(link.0))
            .map(|(i, _)| LinkId(i))
            .collect())
    }

    fn clone_links(
        &mut self,
        body: BodyId,
        links: &[LinkId],
        collision_only: bool,
    ) -> Result<BodyId> {
        let source = self.links(body)?;
        let remap: BTreeMap<usize, usize> = links
            .iter()
            .enumerate()
            .map(|(new, old)| (old.0, new))
            .collect();

        let mut seeds = Vec::with_capacity(links.len());
        let mut base_pose = None;
        for old in links {
            let l = source
                .get(old.0)
                .ok_or_else(|| TampError::UnknownLink(format!("{body}:{}", old.0)))?;
            match l.parent.and_then(|p| remap.get(&p)) {
                Some(&parent) => seeds.push(LinkSeed {
                    name: l.name.clone(),
                    parent: Some(parent),
                    joint: l.joint.clone(),
                    position: l.position(),
                }),
                None => {
                    if base_pose.is_some() {
                        return Err(TampError::UnknownLink(format!(
                            "{body}: cloned links do not form a single subtree"
                        )));
                    }
                    base_pose = Some(self.link_pose(body, *old)?);
                    seeds.push(LinkSeed {
                        name: l.name.clone(),
                        parent: None,
                        joint: None,
                        position: 0.0,
                    });
                }
            }
        }

        // The cloned root must come first so that link 0 stays the base.
        let Some(base_pose) = base_pose else {
            return Err(TampError::UnknownLink(format!("{body}: nothing to clone")));
        };
        if seeds[0].parent.is_some() {
            return Err(TampError::UnknownLink(format!(
                "{body}: subtree root must be listed first"
            )));
        }

        self.insert_articulated(base_pose, seeds, collision_only)
    }

    fn kinematic_chain(&self, body: BodyId) -> Result<k::Chain<f64>> {
        let (_, chain) = build_tree(seeds_of(self.links(body)?))?;
        Ok(chain)
    }
}
