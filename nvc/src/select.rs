//! Device selection.
//!
//! Parsing the device-selection grammar (`"0,1"`, `"GPU-<uuid>"`,
//! `"all"`, MIG-qualified ids) is out of scope here; a caller (e.g.
//! `cli`) parses its own grammar down to a list of [`GpuRef`]s and
//! hands it to [`select`].

use nvc_core::{DeviceInfo, NvcError, Result, Selection};

/// One caller-resolved GPU reference.
#[derive(Debug, Clone)]
pub enum GpuRef {
    Index(usize),
    Uuid(String),
    All,
}

/// Resolve `refs` against `info` into a [`Selection`]. Selecting a GPU
/// implicitly selects all of its MIG instances.
pub fn select(info: &DeviceInfo, refs: &[GpuRef]) -> Result<Selection> {
    if refs.iter().any(|r| matches!(r, GpuRef::All)) {
        return Ok(Selection::all(info));
    }

    let mut gpu_indices = Vec::new();
    for r in refs {
        let idx = match r {
            GpuRef::Index(i) => {
                if *i >= info.gpus.len() {
                    return Err(NvcError::ConfigInvalid(format!("gpu index {i} out of range")));
                }
                *i
            }
            GpuRef::Uuid(uuid) => info
                .gpus
                .iter()
                .position(|g| &g.uuid == uuid)
                .ok_or_else(|| NvcError::ConfigInvalid(format!("no gpu with uuid {uuid}")))?,
            GpuRef::All => unreachable!("handled above"),
        };
        if !gpu_indices.contains(&idx) {
            gpu_indices.push(idx);
        }
    }

    let mut mig_indices = Vec::new();
    for &gi in &gpu_indices {
        for mi in 0..info.gpus[gi].mig_instances.len() {
            mig_indices.push((gi, mi));
        }
    }

    let selection = Selection {
        gpu_indices,
        mig_indices,
        mig_config_all: false,
        mig_monitor_all: false,
        all: false,
    };
    debug_assert!(selection.is_consistent());
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvc_core::model::{Device, DeviceNode, MigInstance};
    use nvc_core::paths;

    fn gpu(minor: u32, uuid: &str, mig: Vec<MigInstance>) -> Device {
        Device {
            model: "Test GPU".into(),
            uuid: uuid.into(),
            busid: "00000000:00:00.0".into(),
            arch: "8.0".into(),
            brand: nvc_core::model::Brand::Tesla,
            node: DeviceNode::char_device(paths::nv_device_path(minor), nvc_core::model::DevId::new(195, minor)),
            mig_capable: !mig.is_empty(),
            mig_caps_path: None,
            mig_instances: mig,
        }
    }

    #[test]
    fn selecting_a_gpu_pulls_in_its_mig_instances() {
        let info = DeviceInfo {
            gpus: vec![gpu(
                0,
                "GPU-a",
                vec![MigInstance {
                    parent_index: 0,
                    uuid: "MIG-1".into(),
                    gi: 1,
                    ci: 0,
                    gi_caps_path: "/x".into(),
                    ci_caps_path: "/y".into(),
                    gi_caps_device: None,
                    ci_caps_device: None,
                }],
            )],
        };
        let sel = select(&info, &[GpuRef::Index(0)]).unwrap();
        assert_eq!(sel.gpu_indices, vec![0]);
        assert_eq!(sel.mig_indices, vec![(0, 0)]);
        assert!(sel.is_consistent());
    }

    #[test]
    fn uuid_lookup_resolves_to_the_matching_index() {
        let info = DeviceInfo {
            gpus: vec![gpu(0, "GPU-a", vec![]), gpu(1, "GPU-b", vec![])],
        };
        let sel = select(&info, &[GpuRef::Uuid("GPU-b".into())]).unwrap();
        assert_eq!(sel.gpu_indices, vec![1]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let info = DeviceInfo { gpus: vec![gpu(0, "GPU-a", vec![])] };
        assert!(select(&info, &[GpuRef::Index(5)]).is_err());
    }

    #[test]
    fn all_token_short_circuits_to_selection_all() {
        let info = DeviceInfo {
            gpus: vec![gpu(0, "GPU-a", vec![]), gpu(1, "GPU-b", vec![])],
        };
        let sel = select(&info, &[GpuRef::All]).unwrap();
        assert!(sel.all);
        assert_eq!(sel.gpu_indices, vec![0, 1]);
    }
}
