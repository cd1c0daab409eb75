//! First-fit placement
//!
//! Functions are taken in request order; for each, sites are scanned in
//! topology order and the first one with enough free cores and memory wins.
//! The chosen site is debited immediately, before the next function is
//! considered. There is no backtracking, so the result depends on both input
//! orders. A request where any entry stays unmapped yields `None`, never a
//! partial mapping.

use crate::{PlacementError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use types::{PlacementMapping, VimAssignment};

/// Site type of container orchestration sites
pub const KUBERNETES: &str = "Kubernetes";

const KUBERNETES_FLAVOR: &str = "kubernetes";

/// One infrastructure site of a topology snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(alias = "vim_uuid")]
    pub vim: String,
    #[serde(default)]
    pub vim_type: Option<String>,
    pub core_total: f64,
    #[serde(default)]
    pub core_used: f64,
    #[serde(alias = "memory_total")]
    pub mem_total: f64,
    #[serde(default, alias = "memory_used")]
    pub mem_used: f64,
}

impl Site {
    pub fn is_container_site(&self) -> bool {
        self.vim_type.as_deref() == Some(KUBERNETES)
    }

    fn fits(&self, vcpus: f64, memory: f64) -> bool {
        vcpus <= self.core_total - self.core_used && memory <= self.mem_total - self.mem_used
    }
}

/// Kind of site a function can run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Virtualised,
    Container,
}

/// Resource demand of one network function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDemand {
    pub id: String,
    pub vcpus: f64,
    pub memory: f64,
    pub storage: f64,
    pub site_kind: SiteKind,
}

impl FunctionDemand {
    /// Read the demand from a function descriptor, or from a `{id, vnfd}` entry
    pub fn from_entry(entry: &Value) -> Result<Self> {
        let id = entry_id(entry)?;
        let descriptor = entry.get("vnfd").unwrap_or(entry);

        let site_kind = match descriptor.get("descriptor_flavor").and_then(Value::as_str) {
            Some(KUBERNETES_FLAVOR) => SiteKind::Container,
            _ => SiteKind::Virtualised,
        };

        Ok(Self {
            vcpus: requirement(descriptor, &id, "cpu/vcpus")?,
            memory: requirement(descriptor, &id, "memory/size")?,
            storage: requirement(descriptor, &id, "storage/size")?,
            site_kind,
            id,
        })
    }

    fn accepts(&self, site: &Site) -> bool {
        match self.site_kind {
            SiteKind::Container => site.is_container_site(),
            SiteKind::Virtualised => !site.is_container_site(),
        }
    }
}

/// Memory demand of one cloud service; placed on container sites only
#[derive(Debug, Clone, PartialEq)]
pub struct CloudServiceDemand {
    pub id: String,
    pub memory: f64,
}

impl CloudServiceDemand {
    /// Read `{id, csd}`; a descriptor without a memory requirement needs none
    pub fn from_entry(entry: &Value) -> Result<Self> {
        let id = entry_id(entry)?;
        let descriptor = entry.get("csd").unwrap_or(entry);

        let memory = match descriptor.pointer(&requirement_path("memory/size")) {
            Some(value) => value.as_f64().ok_or_else(|| {
                PlacementError::invalid_descriptor(&id, "memory size is not a number")
            })?,
            None => 0.0,
        };

        Ok(Self { id, memory })
    }
}

/// First-fit mapping of every function and cloud service, or `None`
pub fn resolve_placement(
    functions: &[FunctionDemand],
    cloud_services: &[CloudServiceDemand],
    topology: &[Site],
) -> Option<PlacementMapping> {
    let mut sites = topology.to_vec();
    let mut mapping = PlacementMapping::new();

    for function in functions {
        let site = sites
            .iter_mut()
            .find(|site| function.accepts(site) && site.fits(function.vcpus, function.memory));

        match site {
            Some(site) => {
                site.core_used += function.vcpus;
                site.mem_used += function.memory;
                debug!(function = %function.id, vim = %site.vim, "Function placed");
                mapping.insert(function.id.clone(), VimAssignment { vim: site.vim.clone() });
            }
            None => debug!(function = %function.id, "No site fits function"),
        }
    }

    for service in cloud_services {
        let site = sites
            .iter_mut()
            .find(|site| site.is_container_site() && site.fits(0.0, service.memory));

        match site {
            Some(site) => {
                site.mem_used += service.memory;
                mapping.insert(service.id.clone(), VimAssignment { vim: site.vim.clone() });
            }
            None => debug!(cloud_service = %service.id, "No site fits cloud service"),
        }
    }

    if mapping.len() == functions.len() + cloud_services.len() {
        Some(mapping)
    } else {
        info!("Placement was not possible");
        None
    }
}

/// `mano.service.place` request body
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementRequest {
    #[serde(default, alias = "cosd")]
    pub nsd: Value,
    #[serde(default)]
    pub functions: Vec<Value>,
    #[serde(default)]
    pub cloud_services: Vec<Value>,
    pub topology: Vec<Site>,
    #[serde(default)]
    pub serv_id: String,
    /// Network attachment points; accepted, not used by first-fit
    #[serde(default)]
    pub nap: Value,
}

impl PlacementRequest {
    pub fn resolve(&self) -> Result<Option<PlacementMapping>> {
        let functions = self
            .functions
            .iter()
            .map(FunctionDemand::from_entry)
            .collect::<Result<Vec<_>>>()?;
        let cloud_services = self
            .cloud_services
            .iter()
            .map(CloudServiceDemand::from_entry)
            .collect::<Result<Vec<_>>>()?;

        info!(
            serv_id = %self.serv_id,
            functions = functions.len(),
            cloud_services = cloud_services.len(),
            sites = self.topology.len(),
            "Placement requested"
        );
        Ok(resolve_placement(&functions, &cloud_services, &self.topology))
    }
}

fn entry_id(entry: &Value) -> Result<String> {
    match entry.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(PlacementError::invalid_descriptor("<unknown>", "missing id")),
    }
}

fn requirement_path(requirement: &str) -> String {
    format!("/virtual_deployment_units/0/resource_requirements/{}", requirement)
}

fn requirement(descriptor: &Value, id: &str, requirement: &str) -> Result<f64> {
    descriptor
        .pointer(&requirement_path(requirement))
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            PlacementError::invalid_descriptor(id, format!("missing numeric {}", requirement))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn site(vim: &str, cores: f64, mem: f64) -> Site {
        Site {
            vim: vim.into(),
            vim_type: None,
            core_total: cores,
            core_used: 0.0,
            mem_total: mem,
            mem_used: 0.0,
        }
    }

    fn k8s(vim: &str, mem: f64) -> Site {
        Site {
            vim_type: Some(KUBERNETES.into()),
            ..site(vim, 0.0, mem)
        }
    }

    fn function(id: &str, vcpus: f64, memory: f64) -> FunctionDemand {
        FunctionDemand {
            id: id.into(),
            vcpus,
            memory,
            storage: 10.0,
            site_kind: SiteKind::Virtualised,
        }
    }

    fn vim_of(mapping: &PlacementMapping, id: &str) -> String {
        mapping[id].vim.clone()
    }

    #[test]
    fn test_single_function_fits() {
        let functions = [function("f1", 2.0, 4.0)];
        let mapping = resolve_placement(&functions, &[], &[site("A", 4.0, 8.0)]).unwrap();
        assert_eq!(vim_of(&mapping, "f1"), "A");
    }

    #[test]
    fn test_insufficient_cores_gives_none() {
        let functions = [function("f1", 2.0, 4.0)];
        assert!(resolve_placement(&functions, &[], &[site("A", 1.0, 8.0)]).is_none());
    }

    #[test]
    fn test_chosen_site_is_debited() {
        let functions = [function("f1", 3.0, 4.0), function("f2", 3.0, 4.0)];
        let topology = [site("A", 4.0, 16.0), site("B", 4.0, 16.0)];

        let mapping = resolve_placement(&functions, &[], &topology).unwrap();
        assert_eq!(vim_of(&mapping, "f1"), "A");
        assert_eq!(vim_of(&mapping, "f2"), "B");
        // The caller's topology is a snapshot and stays untouched
        assert_eq!(topology[0].core_used, 0.0);
    }

    #[test]
    fn test_topology_order_changes_result() {
        let functions = [function("f1", 1.0, 1.0)];
        let (a, b) = (site("A", 4.0, 8.0), site("B", 4.0, 8.0));

        let forward = resolve_placement(&functions, &[], &[a.clone(), b.clone()]).unwrap();
        let reversed = resolve_placement(&functions, &[], &[b, a]).unwrap();

        assert_eq!(vim_of(&forward, "f1"), "A");
        assert_eq!(vim_of(&reversed, "f1"), "B");
    }

    #[test]
    fn test_no_backtracking() {
        // f1 could go to B and leave A for f2, but first-fit takes A
        let functions = [function("f1", 2.0, 2.0), function("f2", 4.0, 2.0)];
        let topology = [site("A", 4.0, 8.0), site("B", 2.0, 8.0)];
        assert!(resolve_placement(&functions, &[], &topology).is_none());
    }

    #[test]
    fn test_never_partial() {
        let functions = [function("f1", 1.0, 1.0), function("f2", 64.0, 1.0)];
        assert!(resolve_placement(&functions, &[], &[site("A", 4.0, 8.0)]).is_none());
    }

    #[test]
    fn test_site_kinds_are_respected() {
        let container_function = FunctionDemand {
            site_kind: SiteKind::Container,
            ..function("c1", 0.0, 1.0)
        };
        let services = [CloudServiceDemand {
            id: "cs1".into(),
            memory: 2.0,
        }];
        let topology = [k8s("K", 4.0), site("A", 4.0, 8.0)];

        let mapping = resolve_placement(
            &[function("f1", 1.0, 1.0), container_function],
            &services,
            &topology,
        )
        .unwrap();
        assert_eq!(vim_of(&mapping, "f1"), "A");
        assert_eq!(vim_of(&mapping, "c1"), "K");
        assert_eq!(vim_of(&mapping, "cs1"), "K");

        // No container site at all: the cloud service is never matched
        assert!(resolve_placement(&[], &services, &[site("A", 4.0, 8.0)]).is_none());
    }

    #[test]
    fn test_demand_from_descriptor() {
        let descriptor = json!({
            "id": "vnf-1",
            "descriptor_flavor": "openstack",
            "virtual_deployment_units": [{
                "resource_requirements": {
                    "cpu": {"vcpus": 2},
                    "memory": {"size": 4},
                    "storage": {"size": 10}
                }
            }]
        });

        let demand = FunctionDemand::from_entry(&descriptor).unwrap();
        assert_eq!(demand.vcpus, 2.0);
        assert_eq!(demand.memory, 4.0);
        assert_eq!(demand.site_kind, SiteKind::Virtualised);

        let wrapped = json!({"id": "vnf-1", "vnfd": descriptor});
        assert_eq!(FunctionDemand::from_entry(&wrapped).unwrap(), demand);
    }

    #[test]
    fn test_descriptor_without_requirements_is_invalid() {
        let err = FunctionDemand::from_entry(&json!({
            "id": "vnf-1",
            "virtual_deployment_units": [{"resource_requirements": {"cpu": {"vcpus": 1}}}]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PlacementError::InvalidDescriptor { ref id, .. } if id == "vnf-1"
        ));

        let anonymous = json!({"virtual_deployment_units": []});
        let err = FunctionDemand::from_entry(&anonymous).unwrap_err();
        assert!(matches!(err, PlacementError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_request_accepts_topology_aliases() {
        let request: PlacementRequest = serde_json::from_value(json!({
            "nsd": {"id": "ns"},
            "cloud_services": [{"id": "cs1", "csd": {"virtual_deployment_units": [{}]}}],
            "topology": [{
                "vim_uuid": "K",
                "vim_type": "Kubernetes",
                "core_total": 8,
                "core_used": 0,
                "memory_total": 32,
                "memory_used": 4
            }],
            "serv_id": "s1"
        }))
        .unwrap();

        let mapping = request.resolve().unwrap().unwrap();
        assert_eq!(vim_of(&mapping, "cs1"), "K");
    }

    fn arb_site() -> impl Strategy<Value = Site> {
        ("[A-E]", 0u8..8, 0u8..16, prop::bool::ANY).prop_map(|(vim, cores, mem, k8s)| Site {
            vim,
            vim_type: k8s.then(|| KUBERNETES.to_string()),
            core_total: cores as f64,
            core_used: 0.0,
            mem_total: mem as f64,
            mem_used: 0.0,
        })
    }

    fn arb_functions() -> impl Strategy<Value = Vec<FunctionDemand>> {
        prop::collection::vec((0u8..4, 0u8..6), 0..6).prop_map(|demands| {
            demands
                .into_iter()
                .enumerate()
                .map(|(i, (cpu, mem))| function(&format!("f{}", i), cpu as f64, mem as f64))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_placement_is_deterministic(
            functions in arb_functions(),
            topology in prop::collection::vec(arb_site(), 0..5),
        ) {
            let first = resolve_placement(&functions, &[], &topology);
            let second = resolve_placement(&functions, &[], &topology);
            prop_assert_eq!(&first, &second);

            if let Some(mapping) = first {
                prop_assert_eq!(mapping.len(), functions.len());

                // No site is ever over-committed
                for candidate in &topology {
                    let (cores, mem) = functions
                        .iter()
                        .filter(|f| mapping[&f.id].vim == candidate.vim)
                        .fold((0.0, 0.0), |(c, m), f| (c + f.vcpus, m + f.memory));
                    let (total_cores, total_mem) = topology
                        .iter()
                        .filter(|s| s.vim == candidate.vim)
                        .fold((0.0, 0.0), |(c, m), s| (c + s.core_total, m + s.mem_total));
                    prop_assert!(cores <= total_cores && mem <= total_mem);
                }
            }
        }
    }
}
