//! Fixed SONAME catalog, grouped exactly as the original driver
//! inventory groups them (grounded in `nvc_info.c`'s
//! `utility_libs`/`compute_libs`/... arrays).

pub const UTILITY_BINS: &[&str] = &["nvidia-smi", "nvidia-debugdump", "nvidia-persistenced"];
pub const COMPUTE_BINS: &[&str] = &["nvidia-cuda-mps-control", "nvidia-cuda-mps-server"];

pub const UTILITY_LIBS: &[&str] = &["libnvidia-ml.so", "libnvidia-cfg.so"];
pub const COMPUTE_LIBS: &[&str] = &[
    "libcuda.so",
    "libnvidia-opencl.so",
    "libnvidia-ptxjitcompiler.so",
    "libnvidia-fatbinaryloader.so",
    "libnvidia-compiler.so",
];
pub const VIDEO_LIBS: &[&str] = &["libvdpau_nvidia.so", "libnvidia-encode.so", "libnvcuvid.so"];
pub const GRAPHICS_LIBS: &[&str] = &[
    "libnvidia-eglcore.so",
    "libnvidia-glcore.so",
    "libnvidia-tls.so",
    "libnvidia-glsi.so",
    "libnvidia-fbc.so",
    "libnvidia-ifr.so",
];
pub const GRAPHICS_LIBS_GLVND: &[&str] = &[
    "libGLX_nvidia.so",
    "libEGL_nvidia.so",
    "libGLESv2_nvidia.so",
    "libGLESv1_CM_nvidia.so",
];
pub const GRAPHICS_LIBS_COMPAT: &[&str] = &["libGL.so", "libEGL.so", "libGLESv1_CM.so", "libGLESv2.so"];
pub const NGX_LIBS: &[&str] = &["libnvidia-ngx.so"];
pub const DXCORE_LIBS: &[&str] = &["libdxcore.so"];

/// Minimum ABI-tag triple a `libnvidia-tls.so` candidate must carry to
/// be kept.
pub const LIBNVIDIA_TLS_MIN_ABI: (u32, u32, u32) = (2, 3, 99);
