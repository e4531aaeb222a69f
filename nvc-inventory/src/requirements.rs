//! Requirement evaluator: a boolean predicate over driver
//! and device attributes, checked before mounting. Constraint syntax
//! parsing belongs to a caller (e.g. the CLI), not this crate.

use nvc_core::model::{Brand, Device};

/// One constraint a caller has requested be satisfied.
#[derive(Debug, Clone)]
pub enum Requirement {
    CudaVersionMin(String),
    DriverVersionMin(String),
    ArchMin(String),
    BrandIn(Vec<Brand>),
}

/// Something that can be checked against a [`Requirement`] list: the
/// running driver/CUDA versions plus a selected device.
pub trait RequirementContext {
    fn cuda_version(&self) -> &str;
    fn driver_version(&self) -> &str;
    fn device(&self) -> &Device;
}

/// Evaluate every requirement against `ctx`, short-circuiting on the
/// first failure and naming it.
pub fn evaluate(ctx: &dyn RequirementContext, requirements: &[Requirement]) -> Result<(), String> {
    for req in requirements {
        let ok = match req {
            Requirement::CudaVersionMin(min) => version_at_least(ctx.cuda_version(), min),
            Requirement::DriverVersionMin(min) => version_at_least(ctx.driver_version(), min),
            Requirement::ArchMin(min) => version_at_least(&ctx.device().arch, min),
            Requirement::BrandIn(brands) => brands.contains(&ctx.device().brand),
        };
        if !ok {
            return Err(format!("requirement not satisfied: {req:?}"));
        }
    }
    Ok(())
}

fn version_at_least(actual: &str, min: &str) -> bool {
    parse_dotted(actual) >= parse_dotted(min)
}

fn parse_dotted(v: &str) -> Vec<u32> {
    v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvc_core::model::DeviceNode;
    use nvc_core::paths;

    struct FakeCtx {
        cuda: String,
        driver: String,
        device: Device,
    }

    impl RequirementContext for FakeCtx {
        fn cuda_version(&self) -> &str {
            &self.cuda
        }
        fn driver_version(&self) -> &str {
            &self.driver
        }
        fn device(&self) -> &Device {
            &self.device
        }
    }

    fn fake_device(arch: &str, brand: Brand) -> Device {
        Device {
            model: "Test".into(),
            uuid: "GPU-0".into(),
            busid: "00000000:00:00.0".into(),
            arch: arch.into(),
            brand,
            node: DeviceNode::char_device(paths::nv_device_path(0), nvc_core::model::DevId::new(195, 0)),
            mig_capable: false,
            mig_caps_path: None,
            mig_instances: Vec::new(),
        }
    }

    #[test]
    fn cuda_version_requirement_passes_when_satisfied() {
        let ctx = FakeCtx {
            cuda: "12.2".into(),
            driver: "535.104.05".into(),
            device: fake_device("8.0", Brand::Tesla),
        };
        assert!(evaluate(&ctx, &[Requirement::CudaVersionMin("11.8".into())]).is_ok());
    }

    #[test]
    fn arch_requirement_fails_when_below_minimum() {
        let ctx = FakeCtx {
            cuda: "12.2".into(),
            driver: "535.104.05".into(),
            device: fake_device("6.0", Brand::Tesla),
        };
        assert!(evaluate(&ctx, &[Requirement::ArchMin("7.0".into())]).is_err());
    }

    #[test]
    fn brand_requirement_checks_membership() {
        let ctx = FakeCtx {
            cuda: "12.2".into(),
            driver: "535.104.05".into(),
            device: fake_device("8.0", Brand::GeForce),
        };
        assert!(evaluate(&ctx, &[Requirement::BrandIn(vec![Brand::Tesla, Brand::QuadroRtx])]).is_err());
    }
}
