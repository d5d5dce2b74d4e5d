//! Compile-time backend selection.
//!
//! Exactly one backend is exposed through [`burn_backend_types`], picked from
//! the enabled cargo features in the order cuda, wgpu, ndarray.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        pub mod burn_backend_types {
            use burn::backend::cuda::{Cuda, CudaDevice};

            pub type InferenceBackend = Cuda;
            pub type InferenceDevice = CudaDevice;
            pub const NAME: &str = "CUDA (NVIDIA GPU)";
        }
    } else if #[cfg(feature = "wgpu")] {
        pub mod burn_backend_types {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};

            pub type InferenceBackend = Wgpu;
            pub type InferenceDevice = WgpuDevice;
            pub const NAME: &str = "WGPU (GPU)";
        }
    } else {
        pub mod burn_backend_types {
            use burn::backend::ndarray::{NdArray, NdArrayDevice};

            pub type InferenceBackend = NdArray;
            pub type InferenceDevice = NdArrayDevice;
            pub const NAME: &str = "NdArray (CPU)";
        }
    }
}
