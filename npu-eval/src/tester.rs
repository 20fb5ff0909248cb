use itertools::{enumerate, zip_eq};
use ndarray::{ArrayD, Dimension};

use npu_graph::dtype::DType;

const MAX_LOGGED_ERRORS: usize = 8;

/// The allowed difference between an expected and an actual value.
/// A value only mismatches if it exceeds both the absolute and the relative tolerance.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tolerance {
    pub abs_diff: f32,
    pub rel_diff: f32,
}

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance {
        abs_diff: 0.0,
        rel_diff: 0.0,
    };

    /// A tolerance matching the precision the kernels compute and store `dtype` in.
    pub fn for_dtype(dtype: DType) -> Tolerance {
        match dtype {
            DType::F16 => Tolerance {
                abs_diff: 0.01,
                rel_diff: 0.01,
            },
            DType::BF16 => Tolerance {
                abs_diff: 0.05,
                rel_diff: 0.02,
            },
            DType::F32 => Tolerance {
                abs_diff: 0.0001,
                rel_diff: 0.0001,
            },
            DType::I8 | DType::I32 | DType::I64 | DType::U8 | DType::Bool => Tolerance::EXACT,
        }
    }
}

pub fn assert_tensors_match(expected: &[ArrayD<f32>], actual: &[ArrayD<f32>], tolerance: Tolerance, print_match: bool) {
    match check_tensors_match(expected, actual, tolerance) {
        Ok(Match { diff_per_tensor }) => {
            if print_match {
                for (i, diff) in enumerate(diff_per_tensor) {
                    println!(
                        "Output {} with shape {:?} matched, max diff: abs {}, rel {}",
                        i,
                        actual[i].shape(),
                        diff.max_abs_diff,
                        diff.max_rel_diff
                    );
                }
            }
        }
        Err(Mismatch {
            error_count,
            total_count,
            first_errors,
        }) => {
            eprintln!("Mismatch in {}/{} values:", error_count, total_count);

            for error in &first_errors {
                eprintln!(
                    "  Wrong output value {:?}, expected {:?} at indices {:?} in tensor {} (shape {:?})",
                    error.actual_value,
                    error.expected_value,
                    error.indices,
                    error.tensor,
                    expected[error.tensor].shape()
                );
                if error.more_omitted {
                    eprintln!("  ...");
                }
            }

            panic!("Output mismatch");
        }
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub diff_per_tensor: Vec<Difference>,
}

#[derive(Debug, Copy, Clone)]
pub struct Difference {
    pub max_abs_diff: f32,
    pub max_rel_diff: f32,
}

#[derive(Debug, Clone)]
pub struct Mismatch {
    pub error_count: u64,
    pub total_count: u64,
    pub first_errors: Vec<Error>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub tensor: usize,
    pub indices: Vec<usize>,
    pub expected_value: f32,
    pub actual_value: f32,
    pub more_omitted: bool,
}

pub fn check_tensors_match(
    expected: &[ArrayD<f32>],
    actual: &[ArrayD<f32>],
    tolerance: Tolerance,
) -> Result<Match, Mismatch> {
    assert_eq!(expected.len(), actual.len(), "Wrong number of tensors");

    let mut total_count = 0;
    let mut error_count = 0;
    let mut diff_per_tensor = vec![];
    let mut first_errors: Vec<Error> = vec![];

    for (i, (expected, actual)) in zip_eq(expected, actual).enumerate() {
        assert_eq!(expected.shape(), actual.shape(), "Wrong shape for tensor {}", i);

        let mut diff = Difference {
            max_abs_diff: 0.0,
            max_rel_diff: 0.0,
        };
        let mut tensor_errors = 0;

        for ((indices, &expected_value), &value) in zip_eq(expected.indexed_iter(), actual.iter()) {
            total_count += 1;

            let (abs_diff, rel_diff) = if expected_value == value || expected_value.is_nan() || value.is_nan() {
                (0.0, 0.0)
            } else {
                let abs_diff = (expected_value - value).abs();
                (abs_diff, abs_diff / expected_value.abs())
            };
            diff.max_abs_diff = diff.max_abs_diff.max(abs_diff);
            diff.max_rel_diff = diff.max_rel_diff.max(rel_diff);

            let exceeds_tolerance = abs_diff > tolerance.abs_diff && rel_diff > tolerance.rel_diff;
            let nan_mismatch = expected_value.is_nan() != value.is_nan();

            if exceeds_tolerance || nan_mismatch {
                error_count += 1;
                tensor_errors += 1;

                if tensor_errors < MAX_LOGGED_ERRORS {
                    first_errors.push(Error {
                        tensor: i,
                        indices: indices.slice().to_vec(),
                        expected_value,
                        actual_value: value,
                        more_omitted: false,
                    });
                } else if let Some(last) = first_errors.last_mut() {
                    last.more_omitted = true;
                }
            }
        }

        diff_per_tensor.push(diff);
    }

    if error_count == 0 {
        Ok(Match { diff_per_tensor })
    } else {
        Err(Mismatch {
            error_count,
            total_count,
            first_errors,
        })
    }
}
