//! Class and method-lookup services.

use object::{Body, Class, Managed, Value};

use crate::{VM, VmResult};

/// Find the invokable for `selector`, searching `class` and its superclasses.
pub fn lookup_invokable(vm: &VM, class: Value, selector: Value) -> VmResult<Option<Value>> {
    let mut current = Some(class);
    while let Some(c) = current {
        let cls = vm.class(c)?;
        if let Some(invokable) = cls.local_method(selector) {
            return Ok(Some(invokable));
        }
        current = cls.superclass;
    }
    Ok(None)
}

pub fn superclass(vm: &VM, class: Value) -> VmResult<Option<Value>> {
    Ok(vm.class(class)?.superclass)
}

pub fn has_field(vm: &VM, class: Value, name: Value) -> VmResult<bool> {
    Ok(field_index(vm, class, name)?.is_some())
}

pub fn field_index(vm: &VM, class: Value, name: Value) -> VmResult<Option<usize>> {
    Ok(vm.class(class)?.field_index(name))
}

/// Whether `class` is `ancestor` or inherits from it.
pub fn inherits_from(vm: &VM, class: Value, ancestor: Value) -> VmResult<bool> {
    let mut current = Some(class);
    while let Some(c) = current {
        if c.is(ancestor) {
            return Ok(true);
        }
        current = vm.class(c)?.superclass;
    }
    Ok(false)
}

/// Create a class with its metaclass and bind it as a global.
///
/// Instance fields of the superclass come first.
pub fn define_class(
    vm: &mut VM,
    name: &str,
    superclass: Option<Value>,
    fields: &[&str],
) -> VmResult<Value> {
    let mut instance_fields = match superclass {
        Some(s) => vm.class(s)?.instance_fields.clone(),
        None => Vec::new(),
    };
    for field in fields {
        instance_fields.push(vm.symbol(field)?);
    }

    let meta_super = match superclass {
        Some(s) => vm.class_of(s)?,
        None => vm.special.class_class,
    };
    let meta_name = vm.symbol(&format!("{name} class"))?;
    let meta = vm.allocate(
        vm.special.metaclass_class,
        Body::Class(Class::new(meta_name, Some(meta_super), Vec::new())),
    )?;
    let class_name = vm.symbol(name)?;
    let class = vm.allocate(
        meta,
        Body::Class(Class::new(class_name, superclass, instance_fields)),
    )?;
    vm.set_global(name, class)?;
    log::debug!("defined class {name}");
    Ok(class)
}

/// Install `invokable` under `selector`, marking a superseded invokable
/// invalid. Returns the superseded one.
pub fn install_method(
    vm: &mut VM,
    class: Value,
    selector: Value,
    invokable: Value,
) -> VmResult<Option<Value>> {
    match &mut vm.object_mut(invokable)?.body {
        Body::Method(m) => m.holder = Some(class),
        Body::Primitive(p) => p.holder = Some(class),
        _ => return Err(crate::mismatch("invokable", invokable)),
    }
    vm.write_barrier(invokable, class);
    let replaced = vm.class_mut(class)?.put_method(selector, invokable);
    vm.write_barrier(class, invokable);
    if let Some(old) = replaced {
        vm.object_mut(old)?.mark_invalid();
    }
    Ok(replaced)
}

/// The class a method definition for `class` on the given side lands in.
pub fn side(vm: &VM, class: Value, class_side: bool) -> VmResult<Value> {
    if class_side { vm.class_of(class) } else { Ok(class) }
}

/// Selector names defined directly in `class`, in definition order.
pub fn selectors(vm: &VM, class: Value) -> VmResult<Vec<(String, Value)>> {
    vm.class(class)?
        .methods
        .iter()
        .map(|&(sel, inv)| Ok((vm.symbol_name(sel)?.to_owned(), inv)))
        .collect()
}
