//! Delivery verification gate (event-sourced).
//!
//! Decides when a delivered order becomes payment-eligible for its seller.

pub mod verification;

pub use verification::{
    AdminOverride, CloseDelivery, DeliveryExceptionRaised, DeliveryRegistered, DeliveryRejected, DeliveryStatus,
    DeliveryStatusRecorded, DeliveryVerification, DeliveryVerificationCommand,
    DeliveryVerificationEvent, DeliveryVerified, ExceptionResolution, RaiseException,
    RecordDeliveryStatus, RegisterDelivery, ResolveException, VerificationStatus, VerifyDelivery,
};

/// Stream type of delivery verifications (one stream per order).
pub const AGGREGATE_TYPE: &str = "delivery.verification";
