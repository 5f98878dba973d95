use anyhow::{Context, Result};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::{info, warn};

use crate::decode::{QuantParams, RawOutputTensor};
use crate::engine::{Backend, EngineOptions, InferenceEngine, InputTensor, TensorSpec};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[repr(C)]
#[derive(Clone, Copy)]
struct TfLiteQuantizationParams {
    scale: f32,
    zero_point: i32,
}

const K_TFLITE_FLOAT32: c_int = 1;
const K_TFLITE_UINT8: c_int = 3;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    fn TfLiteTensorQuantizationParams(tensor: *const TfLiteTensor) -> TfLiteQuantizationParams;
    fn TfLiteTensorCopyFromBuffer(tensor: *mut TfLiteTensor, input_data: *const c_void, input_data_size: usize) -> c_int;
    fn TfLiteTensorCopyToBuffer(tensor: *const TfLiteTensor, output_data: *mut c_void, output_data_size: usize) -> c_int;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char, num_options: usize) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

#[cfg(feature = "vision-gpu")]
#[link(name = "tensorflowlite_gpu_delegate")]
extern "C" {
    fn TfLiteGpuDelegateV2Create(options: *const c_void) -> *mut TfLiteDelegate;
    fn TfLiteGpuDelegateV2Delete(delegate: *mut TfLiteDelegate);
}

enum Delegate {
    #[cfg(feature = "vision-coral")]
    EdgeTpu(*mut TfLiteDelegate),
    #[cfg(feature = "vision-gpu")]
    Gpu(*mut TfLiteDelegate),
}

impl Delegate {
    fn create(backend: Backend) -> Result<Option<Self>> {
        match backend {
            Backend::Cpu => Ok(None),
            #[cfg(feature = "vision-coral")]
            Backend::NnAccelerator => {
                let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null(), 0) };
                anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
                Ok(Some(Self::EdgeTpu(d)))
            }
            #[cfg(feature = "vision-gpu")]
            Backend::Gpu => {
                let d = unsafe { TfLiteGpuDelegateV2Create(ptr::null()) };
                anyhow::ensure!(!d.is_null(), "failed to create GPU delegate");
                Ok(Some(Self::Gpu(d)))
            }
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("backend {:?} not built in; enable vision-coral or vision-gpu", other),
        }
    }

    fn raw(&self) -> *mut TfLiteDelegate {
        match *self {
            #[cfg(feature = "vision-coral")]
            Self::EdgeTpu(d) => d,
            #[cfg(feature = "vision-gpu")]
            Self::Gpu(d) => d,
        }
    }
}

impl Drop for Delegate {
    fn drop(&mut self) {
        match *self {
            #[cfg(feature = "vision-coral")]
            Self::EdgeTpu(d) => unsafe { edgetpu_free_delegate(d) },
            #[cfg(feature = "vision-gpu")]
            Self::Gpu(d) => unsafe { TfLiteGpuDelegateV2Delete(d) },
        }
    }
}

/// Interpreter with its options and delegate; torn down as a unit.
struct Interpreter {
    interp: *mut TfLiteInterpreter,
    opts: *mut TfLiteInterpreterOptions,
    delegate: Option<Delegate>,
}

impl Interpreter {
    fn create(model: *mut TfLiteModel, eo: EngineOptions) -> Result<Self> {
        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create tflite options");
        let mut this = Self { interp: ptr::null_mut(), opts, delegate: None };

        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, eo.num_threads.max(1) as c_int); }

        this.delegate = Delegate::create(eo.backend)?;
        if let Some(d) = &this.delegate {
            unsafe { TfLiteInterpreterOptionsAddDelegate(opts, d.raw()); }
        }

        this.interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!this.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(this.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");
        Ok(this)
    }

    fn input(&self) -> Result<*mut TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "no input tensor");
        Ok(t)
    }

    fn output(&self) -> Result<*const TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "no output tensor 0");
        Ok(t)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
        }
        // delegate dropped after the interpreter that used it
        self.delegate.take();
    }
}

pub struct TfliteEngine {
    model_path: String,
    model: *mut TfLiteModel,
    interp: Interpreter,
    options: EngineOptions,
    spec: TensorSpec,
}

unsafe impl Send for TfliteEngine {}

impl TfliteEngine {
    pub fn new(model_path: &str, options: EngineOptions) -> Result<Self> {
        let cpath = CString::new(model_path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let interp = match Interpreter::create(model, options) {
            Ok(i) => i,
            Err(e) => {
                unsafe { TfLiteModelDelete(model) };
                return Err(e);
            }
        };
        let mut this = Self {
            model_path: model_path.to_string(),
            model,
            interp,
            options,
            spec: TensorSpec { input_size: 0, output_len: 0, output_fields: 0, input_quant: None, output_quant: None },
        };
        this.spec = this.read_spec().context("read tensor layout")?;

        info!(
            "vision: loaded TFLite model: {} (input {}px, {} outputs, quantized={})",
            model_path, this.spec.input_size, this.spec.output_len, this.spec.quantized()
        );
        Ok(this)
    }

    fn read_spec(&self) -> Result<TensorSpec> {
        let input = self.interp.input()?;
        let in_dims = tensor_dims(input);
        let input_size = match in_dims.as_slice() {
            [1, h, w, 3] if h == w => *h as u32,
            other => anyhow::bail!("expected square NHWC RGB input, got dims {:?}", other),
        };
        let input_quant = match unsafe { TfLiteTensorType(input) } {
            K_TFLITE_UINT8 => Some(quant_params(input)?),
            K_TFLITE_FLOAT32 => None,
            other => anyhow::bail!("unsupported input tensor type {}", other),
        };

        let out = self.interp.output()?;
        let out_dims = tensor_dims(out);
        let (num_preds, fields) = match out_dims.as_slice() {
            [1, n, s] => (*n as usize, *s as usize),
            [n, s] => (*n as usize, *s as usize),
            other => anyhow::bail!(
                "unexpected output dims {:?}. Run `beacon vision inspect` to view tensors.",
                other
            ),
        };
        let output_quant = match unsafe { TfLiteTensorType(out) } {
            K_TFLITE_UINT8 => Some(quant_params(out)?),
            K_TFLITE_FLOAT32 => None,
            other => anyhow::bail!("unsupported output tensor type {}", other),
        };

        Ok(TensorSpec { input_size, output_len: num_preds * fields, output_fields: fields, input_quant, output_quant })
    }

    pub fn inspect(&self) -> Result<String> {
        let input = self.interp.input()?;
        let out0 = self.interp.output()?;
        Ok(format!(
            "TFLite inspect ({}):\n- input[0] dims={:?} bytes={} quant={:?}\n- output[0] dims={:?} bytes={} quant={:?}\n- options threads={} backend={:?}\n",
            self.model_path,
            tensor_dims(input), unsafe { TfLiteTensorByteSize(input) }, self.spec.input_quant,
            tensor_dims(out0), unsafe { TfLiteTensorByteSize(out0) }, self.spec.output_quant,
            self.options.num_threads, self.options.backend,
        ))
    }
}

impl InferenceEngine for TfliteEngine {
    fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    fn recognize(&mut self, input: &InputTensor) -> Result<RawOutputTensor> {
        let tensor = self.interp.input()?;
        let need = unsafe { TfLiteTensorByteSize(tensor) };
        let (src, bytes) = match input {
            InputTensor::Quantized(b) => (b.as_ptr() as *const c_void, b.len()),
            InputTensor::Float(v) => (v.as_ptr() as *const c_void, v.len() * std::mem::size_of::<f32>()),
        };
        anyhow::ensure!(bytes == need, "input tensor size mismatch: {} != {}", bytes, need);
        let rc = unsafe { TfLiteTensorCopyFromBuffer(tensor, src, bytes) };
        anyhow::ensure!(rc == 0, "TfLiteTensorCopyFromBuffer failed");

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = self.interp.output()?;
        let out_bytes = unsafe { TfLiteTensorByteSize(out) };
        if self.spec.quantized() {
            let mut buf = vec![0u8; out_bytes];
            let rc = unsafe { TfLiteTensorCopyToBuffer(out, buf.as_mut_ptr() as *mut c_void, out_bytes) };
            anyhow::ensure!(rc == 0, "TfLiteTensorCopyToBuffer failed");
            Ok(RawOutputTensor::Quantized(buf))
        } else {
            let mut buf = vec![0f32; out_bytes / std::mem::size_of::<f32>()];
            let rc = unsafe { TfLiteTensorCopyToBuffer(out, buf.as_mut_ptr() as *mut c_void, out_bytes) };
            anyhow::ensure!(rc == 0, "TfLiteTensorCopyToBuffer failed");
            Ok(RawOutputTensor::Float(buf))
        }
    }

    fn reconfigure(&mut self, opts: EngineOptions) -> Result<()> {
        let fresh = Interpreter::create(self.model, opts)
            .with_context(|| format!("reinitialize interpreter with {:?}", opts))?;
        self.interp = fresh;
        self.options = opts;
        let spec = self.read_spec()?;
        if spec != self.spec {
            warn!("vision: tensor layout changed after reconfigure: {:?}", spec);
            self.spec = spec;
        }
        info!("vision: interpreter recreated threads={} backend={:?}", opts.num_threads, opts.backend);
        Ok(())
    }
}

fn quant_params(t: *const TfLiteTensor) -> Result<QuantParams> {
    let q = unsafe { TfLiteTensorQuantizationParams(t) };
    Ok(QuantParams::new(q.scale, q.zero_point)?)
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for TfliteEngine {
    fn drop(&mut self) {
        // interpreter fields drop after this body; release it before the model
        self.interp = Interpreter { interp: ptr::null_mut(), opts: ptr::null_mut(), delegate: None };
        unsafe {
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
