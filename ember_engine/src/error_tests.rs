//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkQueueSubmit failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("vkQueueSubmit failed"));
}

#[test]
fn test_out_of_memory_display() {
    assert_eq!(format!("{}", Error::OutOfMemory), "Out of GPU memory");
}

#[test]
fn test_allocation_exhausted_display() {
    let err = Error::AllocationExhausted("two pools refused the set".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Descriptor allocation exhausted"));
    assert!(display.contains("two pools refused the set"));
}

#[test]
fn test_device_timeout_display() {
    let err = Error::DeviceTimeout("render fence of slot 1".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Device timeout"));
    assert!(display.contains("slot 1"));
}

#[test]
fn test_pool_condition_display() {
    assert_eq!(format!("{}", Error::OutOfPoolMemory), "Descriptor pool out of memory");
    assert_eq!(format!("{}", Error::FragmentedPool), "Descriptor pool fragmented");
}

// ============================================================================
// CLASSIFICATION TESTS
// ============================================================================

#[test]
fn test_is_pool_exhaustion() {
    assert!(Error::OutOfPoolMemory.is_pool_exhaustion());
    assert!(Error::FragmentedPool.is_pool_exhaustion());

    assert!(!Error::OutOfMemory.is_pool_exhaustion());
    assert!(!Error::BackendError("device lost".to_string()).is_pool_exhaustion());
    assert!(!Error::AllocationExhausted("x".to_string()).is_pool_exhaustion());
}

// ============================================================================
// TRAIT TESTS
// ============================================================================

#[test]
fn test_error_clone_and_debug() {
    let err = Error::InitializationFailed("no graphics queue".to_string());
    let cloned = err.clone();
    assert_eq!(format!("{:?}", err), format!("{:?}", cloned));
    assert!(format!("{:?}", err).contains("InitializationFailed"));
}

#[test]
fn test_error_as_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(Error::InvalidResource("unknown buffer".to_string()));
    assert!(err.to_string().contains("unknown buffer"));
}

#[test]
fn test_result_question_mark() {
    fn inner() -> Result<u32> {
        Err(Error::FragmentedPool)
    }
    fn outer() -> Result<u32> {
        let value = inner()?;
        Ok(value + 1)
    }
    assert!(matches!(outer(), Err(Error::FragmentedPool)));
}
