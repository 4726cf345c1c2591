use crate::config::{Env, ENV_BACKEND_DEVICE, ENV_BACKEND_DTYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const LOG_TARGET: &str = "backend::device";

/// Compute device a backend runs its model on. Picked once at
/// initialization and fixed for the process lifetime.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Metal,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Metal => "metal",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[default]
    Float32,
    Float16,
}

/// Preference order: dedicated GPU, then the Apple-silicon accelerator,
/// then CPU. `BACKEND_DEVICE=gpu|cpu` overrides the probe; `auto` (or the
/// variable being unset) runs it.
pub fn detect_device(env: &impl Env) -> Device {
    let device = match env
        .var(ENV_BACKEND_DEVICE)
        .map(|v| v.to_ascii_lowercase())
        .as_deref()
    {
        Some("cpu") => Device::Cpu,
        Some("gpu") => {
            if cuda_present() {
                Device::Cuda
            } else if apple_silicon() {
                Device::Metal
            } else {
                tracing::warn!(target: LOG_TARGET, "BACKEND_DEVICE=gpu but no accelerator found, using cpu");
                Device::Cpu
            }
        }
        _ => {
            if cuda_present() {
                Device::Cuda
            } else if apple_silicon() {
                Device::Metal
            } else {
                Device::Cpu
            }
        }
    };
    tracing::info!(target: LOG_TARGET, device = %device, "selected synthesis device");
    device
}

/// `BACKEND_DTYPE` is only honored on an accelerator; CPU inference stays
/// in float32.
pub fn detect_dtype(env: &impl Env, device: Device) -> Dtype {
    if device == Device::Cpu {
        return Dtype::Float32;
    }
    match env
        .var(ENV_BACKEND_DTYPE)
        .map(|v| v.to_ascii_lowercase())
        .as_deref()
    {
        Some("float16") | Some("fp16") => Dtype::Float16,
        _ => Dtype::Float32,
    }
}

fn cuda_present() -> bool {
    Path::new("/proc/driver/nvidia/version").exists() || which::which("nvidia-smi").is_ok()
}

fn apple_silicon() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnv;

    #[test]
    fn cpu_override_wins_over_any_probe() {
        let env = MapEnv::default().with_var(ENV_BACKEND_DEVICE, "cpu");
        assert_eq!(detect_device(&env), Device::Cpu);
    }

    #[test]
    fn dtype_defaults_to_float32_and_ignores_requests_on_cpu() {
        let env = MapEnv::default().with_var(ENV_BACKEND_DTYPE, "float16");
        assert_eq!(detect_dtype(&env, Device::Cpu), Dtype::Float32);
        assert_eq!(detect_dtype(&env, Device::Cuda), Dtype::Float16);
        assert_eq!(detect_dtype(&MapEnv::default(), Device::Cuda), Dtype::Float32);
    }

    #[test]
    fn device_names_are_stable() {
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert_eq!(Device::Metal.to_string(), "metal");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }
}
