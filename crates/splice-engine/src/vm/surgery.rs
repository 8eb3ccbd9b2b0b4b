//! Method-record surgery
//!
//! Installing a redirect overwrites the whole metadata record of the target
//! method with the replacement's record. Two byte ranges are treated
//! specially:
//! - the declaring-class slot keeps the target's value, so reflection still
//!   reports the original declaring class
//! - the access flags gain PUBLIC, so the replacement body is callable from
//!   any call site the target was callable from
//!
//! Rewriting only the entry points is not enough: both execution modes consult
//! other record fields during dispatch.

use tracing::debug;

use super::{
    AccessFlags, ClassId, ManagedRuntime, MethodDescriptor, RecordLayout, RuntimeError,
    RuntimeResult,
};

/// Copy `replacement` over `target`, preserving the target's declaring class
pub fn transplant(layout: &RecordLayout, target: &mut [u8], replacement: &[u8]) -> RuntimeResult<()> {
    for record in [&*target, replacement] {
        if record.len() != layout.size {
            return Err(RuntimeError::RecordSize {
                expected: layout.size,
                actual: record.len(),
            });
        }
    }

    let declaring = layout.read(target, layout.declaring_class);
    target.copy_from_slice(replacement);
    layout.write(target, layout.declaring_class, declaring);

    let flags = AccessFlags(layout.read(target, layout.access_flags) as u32) | AccessFlags::PUBLIC;
    layout.write(target, layout.access_flags, flags.bits() as u64);
    Ok(())
}

/// Promote every declared field of `class` to unrestricted access
///
/// Returns the number of fields touched.
pub fn promote_fields(runtime: &dyn ManagedRuntime, class: ClassId) -> RuntimeResult<usize> {
    let fields = runtime.declared_fields(class)?;
    for field in &fields {
        let flags = runtime.update_field_flags(field.id, &|f| f.promoted())?;
        debug!(field = %field.name, flags = flags.bits(), "promoted field access");
    }
    Ok(fields.len())
}

/// Make `target` execute `replacement`'s body
///
/// The replacement's declaring class is initialized first, the record is
/// transplanted inside the VM's critical section, and the replacement class's
/// fields are promoted so its body can reach them from the target's context.
pub fn install(
    runtime: &dyn ManagedRuntime,
    layout: &RecordLayout,
    target: &MethodDescriptor,
    replacement: &MethodDescriptor,
    replacement_class: ClassId,
) -> RuntimeResult<()> {
    runtime.initialize_class(replacement_class)?;

    let source = runtime.read_method_record(replacement.id)?;
    runtime.write_method_record(target.id, &mut |record| transplant(layout, record, &source))?;

    promote_fields(runtime, replacement_class)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::layout::{layout_for, RuntimeFlavor};
    use super::*;

    fn record(layout: &RecordLayout, declaring: u64, flags: AccessFlags, entry: u64) -> Vec<u8> {
        let mut r = layout.blank();
        layout.write(&mut r, layout.declaring_class, declaring);
        layout.write(&mut r, layout.access_flags, flags.bits() as u64);
        layout.write(&mut r, layout.interpreter_entry, entry);
        layout.write(&mut r, layout.compiled_entry, entry);
        layout.write(&mut r, layout.method_index, 3);
        r
    }

    #[test]
    fn test_transplant_keeps_declaring_class() {
        let layout = layout_for(RuntimeFlavor::Art, 23).unwrap();
        let mut target = record(layout, 0x10, AccessFlags::PRIVATE | AccessFlags::STATIC, 1);
        let replacement = record(layout, 0x20, AccessFlags::STATIC, 2);

        transplant(layout, &mut target, &replacement).unwrap();

        assert_eq!(layout.read(&target, layout.declaring_class), 0x10);
        assert_eq!(layout.read(&target, layout.interpreter_entry), 2);
        assert_eq!(layout.read(&target, layout.compiled_entry), 2);
        let flags = AccessFlags(layout.read(&target, layout.access_flags) as u32);
        assert!(flags.contains(AccessFlags::PUBLIC | AccessFlags::STATIC));
    }

    #[test]
    fn test_transplant_copies_unnamed_bytes() {
        let layout = layout_for(RuntimeFlavor::Art, 24).unwrap();
        let mut target = record(layout, 1, AccessFlags::PUBLIC, 1);
        let mut replacement = record(layout, 2, AccessFlags::PUBLIC, 2);
        // resolved-types pointer: not a named slot, still part of the record
        replacement[28] = 0xAB;

        transplant(layout, &mut target, &replacement).unwrap();
        assert_eq!(target[28], 0xAB);
    }

    #[test]
    fn test_transplant_rejects_wrong_size() {
        let layout = layout_for(RuntimeFlavor::Dalvik, 19).unwrap();
        let mut target = layout.blank();
        let short = vec![0u8; layout.size - 1];
        let err = transplant(layout, &mut target, &short).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::RecordSize {
                expected: layout.size,
                actual: layout.size - 1
            }
        );
    }

    #[test]
    fn test_transplant_is_idempotent_under_overwrite() {
        let layout = layout_for(RuntimeFlavor::Art, 22).unwrap();
        let mut target = record(layout, 5, AccessFlags::PUBLIC, 1);
        let a = record(layout, 6, AccessFlags::PUBLIC, 2);
        let b = record(layout, 7, AccessFlags::PUBLIC, 3);

        transplant(layout, &mut target, &a).unwrap();
        transplant(layout, &mut target, &b).unwrap();
        let once = target.clone();
        transplant(layout, &mut target, &b).unwrap();

        assert_eq!(target, once);
        assert_eq!(layout.read(&target, layout.interpreter_entry), 3);
        assert_eq!(layout.read(&target, layout.declaring_class), 5);
    }
}
