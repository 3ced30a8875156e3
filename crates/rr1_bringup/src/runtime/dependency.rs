//! Exit-trigger graph construction and topological sorting

use crate::config::{LaunchDescription, ProcessSpec};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// A process in the trigger graph
#[derive(Debug, Clone)]
pub struct ResolvedProcess {
    /// Process name
    pub name: String,
    /// Declared configuration
    pub spec: ProcessSpec,
    /// Process whose exit starts this one (None for roots)
    pub trigger: Option<String>,
    /// Start wave: 0 for roots, trigger's stage + 1 otherwise
    pub stage: usize,
}

/// Trigger graph for a launch description
#[derive(Debug)]
pub struct DependencyGraph {
    /// Processes in topological order
    pub processes: Vec<ResolvedProcess>,
    /// Map from process name to index
    pub index_map: HashMap<String, usize>,
    /// Processes started by each process' exit
    on_exit: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the trigger graph from a launch description
    pub fn build(description: &LaunchDescription) -> Result<Self, DependencyError> {
        let mut triggers: HashMap<&str, &str> = HashMap::new();
        let mut on_exit: HashMap<String, Vec<String>> = HashMap::new();

        for handler in &description.event_handlers {
            let target = handler.target();
            if !description.processes.contains_key(target) {
                return Err(DependencyError::UnknownProcess(target.to_string()));
            }
            for launched in handler.launches() {
                if !description.processes.contains_key(launched) {
                    return Err(DependencyError::UnknownProcess(launched.clone()));
                }
                if let Some(previous) = triggers.insert(launched, target) {
                    return Err(DependencyError::MultipleTriggers {
                        process: launched.clone(),
                        first: previous.to_string(),
                        second: target.to_string(),
                    });
                }
                on_exit
                    .entry(target.to_string())
                    .or_default()
                    .push(launched.clone());
            }
        }

        let nodes: IndexMap<&str, Option<&str>> = description
            .processes
            .keys()
            .map(|name| (name.as_str(), triggers.get(name.as_str()).copied()))
            .collect();

        let order = Self::topological_sort(&nodes, &on_exit)?;

        let mut stages: HashMap<&str, usize> = HashMap::new();
        let mut processes = Vec::with_capacity(order.len());
        for name in order {
            let trigger = nodes[name];
            let stage = trigger.map_or(0, |t| stages[t] + 1);
            stages.insert(name, stage);
            processes.push(ResolvedProcess {
                name: name.to_string(),
                spec: description.processes[name].clone(),
                trigger: trigger.map(str::to_string),
                stage,
            });
        }

        let index_map = processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();

        Ok(Self {
            processes,
            index_map,
            on_exit,
        })
    }

    /// Topological sort using Kahn's algorithm, seeded in declaration order
    fn topological_sort<'a>(
        nodes: &IndexMap<&'a str, Option<&'a str>>,
        on_exit: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<&'a str>, DependencyError> {
        let mut queue: VecDeque<&str> = nodes
            .iter()
            .filter(|(_, trigger)| trigger.is_none())
            .map(|(name, _)| *name)
            .collect();

        let mut sorted = Vec::with_capacity(nodes.len());
        while let Some(name) = queue.pop_front() {
            sorted.push(name);
            if let Some(next) = on_exit.get(name) {
                // Every process has at most one trigger, so it is ready as
                // soon as that trigger is placed.
                for launched in next {
                    if let Some((key, _)) = nodes.get_key_value(launched.as_str()) {
                        queue.push_back(*key);
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let placed: HashSet<&str> = sorted.iter().copied().collect();
            let cycle: Vec<String> = nodes
                .keys()
                .filter(|name| !placed.contains(*name))
                .map(|name| name.to_string())
                .collect();
            return Err(DependencyError::CyclicDependency(cycle));
        }

        Ok(sorted)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedProcess> {
        self.index_map.get(name).map(|&i| &self.processes[i])
    }

    /// Processes started at time zero
    pub fn roots(&self) -> impl Iterator<Item = &ResolvedProcess> {
        self.processes.iter().filter(|p| p.trigger.is_none())
    }

    /// Process whose exit starts `name`
    pub fn trigger_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.trigger.as_deref())
    }

    /// Processes started when `name` exits
    pub fn on_exit(&self, name: &str) -> &[String] {
        self.on_exit.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `name` transitively waits on `ancestor`
    pub fn depends_on(&self, name: &str, ancestor: &str) -> bool {
        let mut current = self.trigger_of(name);
        while let Some(trigger) = current {
            if trigger == ancestor {
                return true;
            }
            current = self.trigger_of(trigger);
        }
        false
    }

    /// Process names grouped by start wave
    pub fn stages(&self) -> Vec<Vec<&str>> {
        let mut stages: Vec<Vec<&str>> = Vec::new();
        for process in &self.processes {
            if stages.len() <= process.stage {
                stages.resize_with(process.stage + 1, Vec::new);
            }
            stages[process.stage].push(process.name.as_str());
        }
        stages
    }

    /// Get the launch order (reverse of shutdown order)
    pub fn launch_order(&self) -> impl Iterator<Item = &ResolvedProcess> {
        self.processes.iter()
    }

    /// Get the shutdown order (reverse of launch order)
    pub fn shutdown_order(&self) -> impl Iterator<Item = &ResolvedProcess> {
        self.processes.iter().rev()
    }
}

/// Errors that can occur when building the trigger graph
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Event handler references unknown process '{0}'")]
    UnknownProcess(String),

    #[error("Process '{process}' is triggered by both '{first}' and '{second}'")]
    MultipleTriggers {
        process: String,
        first: String,
        second: String,
    },

    #[error("Cyclic dependency detected involving processes: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bringup::{self, spawn_description};
    use crate::config::{EventHandler, RobotConfig};

    fn chain(handlers: &[(&str, &str)], names: &[&str]) -> LaunchDescription {
        let mut description = LaunchDescription::new();
        for name in names {
            description = description.add_process(*name, ProcessSpec::command("/bin/true"));
        }
        for (target, launched) in handlers {
            description = description
                .register_event_handler(EventHandler::on_process_exit(*target, [*launched]));
        }
        description
    }

    #[test]
    fn test_simple_chain_order() {
        let description = chain(&[("a", "b"), ("b", "c")], &["c", "b", "a"]);
        let graph = DependencyGraph::build(&description).unwrap();

        let order: Vec<_> = graph.launch_order().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        let shutdown: Vec<_> = graph.shutdown_order().map(|p| p.name.as_str()).collect();
        assert_eq!(shutdown, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_bringup_stages() {
        let graph = DependencyGraph::build(&spawn_description(&RobotConfig::default())).unwrap();

        assert_eq!(
            graph.stages(),
            vec![
                vec![bringup::ROBOT_STATE_PUBLISHER, bringup::SPAWN_ENTITY],
                vec![bringup::JOINT_STATE_BROADCASTER],
                vec![
                    bringup::FORWARD_POSITION_CONTROLLER,
                    bringup::JOINT_TRAJECTORY_CONTROLLER
                ],
            ]
        );
        let roots: Vec<_> = graph.roots().map(|p| p.name.as_str()).collect();
        assert_eq!(
            roots,
            vec![bringup::ROBOT_STATE_PUBLISHER, bringup::SPAWN_ENTITY]
        );
    }

    #[test]
    fn test_bringup_triggers() {
        let graph = DependencyGraph::build(&spawn_description(&RobotConfig::default())).unwrap();

        assert_eq!(
            graph.trigger_of(bringup::JOINT_STATE_BROADCASTER),
            Some(bringup::SPAWN_ENTITY)
        );
        for controller in [
            bringup::FORWARD_POSITION_CONTROLLER,
            bringup::JOINT_TRAJECTORY_CONTROLLER,
        ] {
            assert_eq!(
                graph.trigger_of(controller),
                Some(bringup::JOINT_STATE_BROADCASTER)
            );
            assert!(graph.depends_on(controller, bringup::SPAWN_ENTITY));
            assert!(!graph.depends_on(controller, bringup::ROBOT_STATE_PUBLISHER));
        }
        assert!(!graph.depends_on(
            bringup::FORWARD_POSITION_CONTROLLER,
            bringup::JOINT_TRAJECTORY_CONTROLLER
        ));
        assert!(!graph.depends_on(
            bringup::JOINT_TRAJECTORY_CONTROLLER,
            bringup::FORWARD_POSITION_CONTROLLER
        ));
        assert_eq!(graph.trigger_of(bringup::SPAWN_ENTITY), None);
        assert_eq!(
            graph.on_exit(bringup::JOINT_STATE_BROADCASTER),
            &[
                bringup::FORWARD_POSITION_CONTROLLER.to_string(),
                bringup::JOINT_TRAJECTORY_CONTROLLER.to_string()
            ]
        );
        assert!(graph.on_exit(bringup::ROBOT_STATE_PUBLISHER).is_empty());
    }

    #[test]
    fn test_cyclic_dependency_detection() {
        let description = chain(&[("a", "b"), ("b", "c"), ("c", "a")], &["a", "b", "c", "d"]);
        let result = DependencyGraph::build(&description);

        match result {
            Err(DependencyError::CyclicDependency(names)) => {
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            other => panic!("Expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_triggers() {
        let description = chain(&[("a", "c"), ("b", "c")], &["a", "b", "c"]);
        let result = DependencyGraph::build(&description);

        assert!(matches!(
            result,
            Err(DependencyError::MultipleTriggers { .. })
        ));
    }

    #[test]
    fn test_unknown_process() {
        let description = chain(&[("a", "ghost")], &["a"]);
        let result = DependencyGraph::build(&description);

        assert!(matches!(result, Err(DependencyError::UnknownProcess(name)) if name == "ghost"));
    }
}
