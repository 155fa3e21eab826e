//! Emitter — walks the type cache and writes one TypeScript file per
//! projectable type plus the module index.
//!
//! Emission is two-pass per type: the first pass renders into a discard
//! sink so the name renderer can populate the imports set, the second pass
//! writes the header, the collected imports and the body to the real file.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cache::{
    self, FieldAttributes, MethodSig, ParamAttributes, SigParam, TypeCache, TypeDef, TypeKind,
};
use crate::config::Options;
use crate::policy::{self, AsyncCompletion};
use crate::semantics::{self, GenericArgs, GenericInstance, TypeSemantics};

/// The output sink. The first render pass of every type writes here as
/// [`Sink::Discard`]; only the imports set observed by the name renderer
/// survives it.
enum Sink {
    Discard,
    File(BufWriter<fs::File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Discard => Ok(buf.len()),
            Sink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Discard => Ok(()),
            Sink::File(file) => file.flush(),
        }
    }
}

/// Stateful projection writer.
///
/// `path` and `stack` grow and shrink in lockstep with the namespace
/// traversal; the imports set is cleared on every file pop.
pub struct Writer<'a> {
    cache: &'a TypeCache,
    options: &'a Options,
    base_path: PathBuf,
    path: PathBuf,
    stack: Vec<String>,
    imported_types: BTreeSet<String>,
    out: Sink,
    generic_args: GenericArgs,
    first_pass: bool,
}

impl<'a> Writer<'a> {
    pub fn new(cache: &'a TypeCache, options: &'a Options, out_dir: &Path) -> Writer<'a> {
        let mut base_path = out_dir.to_path_buf();
        for bit in cache.assembly().name.split('.') {
            base_path.push(bit);
        }
        Writer {
            cache,
            options,
            path: base_path.clone(),
            base_path,
            stack: Vec::new(),
            imported_types: BTreeSet::new(),
            out: Sink::Discard,
            generic_args: GenericArgs::default(),
            first_pass: false,
        }
    }

    /// The directory everything is written under:
    /// `<out>/<assembly-name-components…>`.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn write(&mut self) -> Result<()> {
        self.write_files()?;
        self.write_module()
    }

    // -----------------------------------------------------------------------
    // Per-type files
    // -----------------------------------------------------------------------

    pub fn write_files(&mut self) -> Result<()> {
        let cache = self.cache;
        self.path = self.base_path.clone();
        for (namespace, types) in cache.namespaces() {
            if !cache.is_runtime_namespace(namespace) {
                continue;
            }
            self.enter_namespace_dirs(namespace)?;
            for (name, td) in types {
                let td = *td;
                if !policy::should_project(cache, td, self.options) {
                    info!(type_name = %format!("{namespace}.{name}"), "skipping type");
                    continue;
                }
                self.write_type_file(namespace, name, td)?;
            }
        }
        while !self.stack.is_empty() {
            self.pop()?;
        }
        Ok(())
    }

    /// Move the directory stack to the given namespace: pop frames until
    /// the stack is a prefix of the namespace components, then push and
    /// create the remainder.
    fn enter_namespace_dirs(&mut self, namespace: &str) -> Result<()> {
        let parts: Vec<String> = namespace.split('.').map(str::to_string).collect();
        while self.stack.len() > parts.len()
            || self.stack.iter().zip(&parts).any(|(have, want)| have != want)
        {
            self.pop()?;
        }
        for part in &parts[self.stack.len()..] {
            self.path.push(part);
            self.stack.push(part.clone());
        }
        if !self.path.is_dir() {
            fs::create_dir_all(&self.path)
                .with_context(|| format!("creating {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Leave the current file or directory frame. Closing a file flushes
    /// it; the imports set never outlives a frame.
    fn pop(&mut self) -> Result<()> {
        self.imported_types.clear();
        self.stack.pop();
        self.close_output()?;
        self.path.pop();
        Ok(())
    }

    fn close_output(&mut self) -> Result<()> {
        self.out
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;
        self.out = Sink::Discard;
        Ok(())
    }

    fn write_type_file(&mut self, namespace: &str, name: &str, td: TypeDef) -> Result<()> {
        let params = self.cache.generic_param_names(td);
        let pushed = self.generic_args.push_params(&params);
        let result = self.write_type_file_inner(namespace, name, td);
        if pushed {
            self.generic_args.pop();
        }
        result.with_context(|| format!("projecting {namespace}.{name}"))
    }

    fn write_type_file_inner(&mut self, namespace: &str, name: &str, td: TypeDef) -> Result<()> {
        let type_name = format!("{namespace}.{name}");
        let file_name = format!("{name}.ts");

        // First pass into the discard sink: collects imports only.
        self.first_pass = true;
        self.out = Sink::Discard;
        self.write_type(td)?;

        // Never overwrite a hand-written file: generated files open with a
        // `//` banner, anything else gets a .gen.ts sibling instead.
        let mut out_name = file_name.clone();
        if preserve_existing(&self.path.join(&file_name))? {
            out_name = format!("{name}.gen.ts");
        }
        self.path.push(&out_name);
        let file = fs::File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        self.out = Sink::File(BufWriter::new(file));

        self.write_header()?;
        if !self.imported_types.is_empty() {
            let imports: Vec<String> = self.imported_types.iter().cloned().collect();
            for imported in imports {
                if imported != type_name {
                    self.write_import(&imported, None)?;
                }
            }
            writeln!(self.out)?;
        }

        self.stack.push(file_name);
        self.first_pass = false;
        self.write_type(td)?;
        self.pop()
    }

    fn write_type(&mut self, td: TypeDef) -> Result<()> {
        match self.cache.kind(td) {
            TypeKind::Enum => self.write_enum(td),
            TypeKind::Struct => self.write_struct(td),
            TypeKind::Interface => self.write_interface(td),
            TypeKind::Class => self.write_class(td),
            TypeKind::Delegate => self.write_delegate(td),
            TypeKind::Other => {
                info!(
                    type_name = %format!("{}.{}", td.namespace(), td.name()),
                    "not processing uncategorized type"
                );
                Ok(())
            }
        }
    }

    fn write_header(&mut self) -> Result<()> {
        let assembly = self.cache.assembly();
        let (major, minor, build, revision) = assembly.version;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(self.out, "// --------------------------------------------------")?;
        writeln!(self.out, "// <auto-generated>")?;
        writeln!(self.out, "//     This code was generated by tswinmd.")?;
        writeln!(
            self.out,
            "//     Generated from {} {major}.{minor}.{build}.{revision} at {timestamp}",
            assembly.name
        )?;
        writeln!(self.out, "// </auto-generated>")?;
        writeln!(self.out, "// --------------------------------------------------")?;
        writeln!(self.out)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Category emitters
    // -----------------------------------------------------------------------

    fn write_enum(&mut self, td: TypeDef) -> Result<()> {
        let is_flags = self.cache.is_flags_enum(td);
        let mut counter: u32 = 0;
        writeln!(self.out, "export enum {} {{", td.name())?;
        for field in td.fields() {
            // value__ carries no constant and is skipped.
            let Some(constant) = field.constant() else {
                continue;
            };
            let member = policy::normalize_member(field.name());
            let value = cache::constant_u32(&constant.value())
                .with_context(|| format!("enum member {}.{}", td.name(), field.name()))?;
            write!(self.out, "    {member}")?;
            if value != counter || is_flags {
                if is_flags {
                    write!(self.out, " = 0x{value:x}")?;
                } else {
                    write!(self.out, " = {}", value as i32)?;
                }
            }
            writeln!(self.out, ",")?;
            counter = counter.wrapping_add(1);
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn write_struct(&mut self, td: TypeDef) -> Result<()> {
        if self.first_pass && self.cache.is_api_contract(td) {
            debug!(contract = td.name(), "projecting api contract as plain struct");
        }
        writeln!(self.out, "export interface {} {{", td.name())?;
        for field in td.fields() {
            let (ty, _) = cache::peel_array(field.ty());
            let semantics = semantics::of_type(&ty, self.cache)?;
            let member = policy::normalize_member(field.name());
            let rendered = self.projection_type_name(&semantics, false, true)?;
            let prefix = if field.flags().contains(FieldAttributes::Static) {
                "static "
            } else {
                ""
            };
            writeln!(self.out, "    {prefix}{member}: {rendered};")?;
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn write_interface(&mut self, td: TypeDef) -> Result<()> {
        let name = self.type_name(&TypeSemantics::Definition(td), false)?;
        write!(self.out, "export interface {name}")?;
        self.write_inherited_types(td, &TypeSemantics::Object)?;
        writeln!(self.out, " {{")?;
        self.write_properties(td, true)?;
        self.write_method_list(td, false)?;
        self.write_event_list(td, true)?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn write_class(&mut self, td: TypeDef) -> Result<()> {
        let name = self.type_name(&TypeSemantics::Definition(td), false)?;
        let base = match self.cache.extends(td) {
            Some((namespace, base_name)) => {
                semantics::of_name(&namespace, &base_name, self.cache)?
            }
            None => TypeSemantics::Object,
        };

        if self.first_pass && self.cache.interfaces(td).iter().any(|i| i.is_default) {
            debug!(
                class = %format!("{}.{}", td.namespace(), td.name()),
                "class has a default interface"
            );
        }

        if self.options.generate_shims && self.options.enable_decorators {
            self.imported_types
                .insert("Windows.Foundation.Interop.GenerateShim".to_string());
            writeln!(
                self.out,
                "@GenerateShim('{}.{}')",
                td.namespace(),
                td.name()
            )?;
        }

        write!(self.out, "export class {name}")?;
        self.write_inherited_types(td, &base)?;
        writeln!(self.out, " {{ ")?;
        self.write_properties(td, false)?;
        self.write_ctors(td)?;
        self.write_method_list(td, true)?;
        self.write_event_list(td, false)?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    fn write_delegate(&mut self, td: TypeDef) -> Result<()> {
        let name = self.type_name(&TypeSemantics::Definition(td), false)?;
        let invoke = self.cache.delegate_invoke(td)?;
        let sig = MethodSig::new(invoke);
        let return_type_name = self.return_type_name(&sig, &[])?;
        // The sender parameter is implicit on the TypeScript side.
        let params = self.parameter_list(&sig, true)?;
        writeln!(
            self.out,
            "export type {name} = ({params}) => {return_type_name};"
        )?;
        Ok(())
    }

    /// Write the `extends`/`implements` clause: the base type (unless it is
    /// the object root), then the implemented interfaces — after `extends`
    /// for interfaces, after `implements` for classes.
    fn write_inherited_types(&mut self, td: TypeDef, base: &TypeSemantics) -> Result<()> {
        let mut delimiter = " extends ";
        if !matches!(base, TypeSemantics::Object) {
            let name = self.type_name(base, false)?;
            write!(self.out, "{delimiter}{name}")?;
            delimiter = ", ";
        }
        if self.cache.kind(td) != TypeKind::Interface {
            delimiter = " implements ";
        }
        for iface in self.cache.interfaces(td) {
            let semantics = semantics::of_type(&iface.ty, self.cache)?;
            let rendered = self.for_typedef(&semantics, |w, iface_td| {
                if w.cache.is_exclusive_to(iface_td) && !w.options.include_exclusive {
                    return Ok(None);
                }
                w.definition_with_params(iface_td).map(Some)
            })?;
            if let Some(name) = rendered {
                write!(self.out, "{delimiter}{name}")?;
                delimiter = ", ";
            }
        }
        Ok(())
    }

    fn write_properties(&mut self, td: TypeDef, is_interface: bool) -> Result<()> {
        for property in self.cache.properties(td) {
            let semantics = semantics::of_type(&property.ty, self.cache)?;
            let rendered = self.projection_type_name(&semantics, false, true)?;
            let member = policy::normalize_member(&property.name);
            let is_static = property.getter.is_some_and(cache::is_static)
                || property.setter.is_some_and(cache::is_static);
            let readonly = property.getter.is_some() && property.setter.is_none();

            let mut line = String::from("    ");
            if is_static {
                line.push_str("static ");
            }
            if readonly {
                line.push_str("readonly ");
            }
            line.push_str(&member);
            line.push_str(": ");
            line.push_str(&rendered);
            if property.is_array {
                line.push_str("[]");
            }
            if !is_interface {
                line.push_str(" = null");
            }
            writeln!(self.out, "{line};")?;
        }
        Ok(())
    }

    fn write_ctors(&mut self, td: TypeDef) -> Result<()> {
        let mut ctors: Vec<MethodSig> = td
            .methods()
            .filter(|m| cache::is_constructor(*m))
            .map(MethodSig::new)
            .collect();
        ctors.sort_by_key(|sig| sig.params.len());

        let max_params = ctors.iter().map(|sig| sig.params.len()).max().unwrap_or(0);
        if max_params == 0 {
            if self.first_pass && self.cache.is_activatable(td) {
                debug!(
                    class = %format!("{}.{}", td.namespace(), td.name()),
                    "activatable class with default construction only"
                );
            }
            return Ok(());
        }

        let single = ctors.len() == 1;
        for sig in &ctors {
            let mut rendered = Vec::new();
            for param in &sig.params {
                let semantics = semantics::of_type(&param.ty, self.cache)?;
                let ty = self.projection_type_name(&semantics, false, true)?;
                rendered.push(format!("{}: {ty}", policy::normalize_member(&param.name)));
            }
            if single {
                writeln!(self.out, "    constructor({}) {{", rendered.join(", "))?;
                writeln!(
                    self.out,
                    "        console.warn('{}.ctor not implemented')",
                    td.name()
                )?;
                writeln!(self.out, "    }}")?;
            } else {
                writeln!(self.out, "    // constructor({});", rendered.join(", "))?;
            }
        }
        if !single {
            writeln!(self.out, "    constructor(...args) {{ }}")?;
        }
        Ok(())
    }

    fn write_method_list(&mut self, td: TypeDef, include_signature: bool) -> Result<()> {
        let mut emitted = BTreeSet::new();
        for method in td.methods() {
            if cache::is_special(method) {
                continue;
            }
            let mut name = method.name().to_string();
            // Duplicate across the collection interfaces; never projected.
            if name == "IndexOf" {
                continue;
            }

            let sig = MethodSig::new(method);
            let out_params = sig.out_params();
            let return_type_name = self.return_type_name(&sig, &out_params)?;
            let should_throw = return_type_name != "void";

            if let Some(overload) = cache::overload_name(method) {
                if !self.first_pass {
                    info!(
                        from = %format!("{}.{}#{}", td.namespace(), td.name(), name),
                        to = %overload,
                        "applying overload rename"
                    );
                }
                name = overload;
            }

            let method_name = policy::normalize_member(&name);
            if !emitted.insert(method_name.clone()) {
                if !self.first_pass {
                    warn!(
                        method = %format!("{}.{}#{}", td.namespace(), td.name(), name),
                        "skipping non-uniquely overloaded method"
                    );
                }
                continue;
            }

            let stat = if cache::is_static(method) { "static " } else { "" };
            let params = self.parameter_list(&sig, false)?;
            write!(self.out, "    {stat}{method_name}({params}): {return_type_name}")?;

            if include_signature {
                writeln!(self.out, " {{")?;
                write!(self.out, "        ")?;
                if let Some(stub) = policy::async_stub(&return_type_name) {
                    self.imported_types.insert(stub.import.to_string());
                    match stub.completion {
                        AsyncCompletion::Warn => write!(
                            self.out,
                            "return {}.from(async () => console.warn('{}#{} not implemented'));",
                            stub.helper,
                            td.name(),
                            method_name
                        )?,
                        AsyncCompletion::Throw => write!(
                            self.out,
                            "return {}.from(async () => {{ throw new Error('{}#{} not implemented') }});",
                            stub.helper,
                            td.name(),
                            method_name
                        )?,
                    }
                } else if should_throw {
                    write!(
                        self.out,
                        "throw new Error('{}#{} not implemented')",
                        td.name(),
                        method_name
                    )?;
                } else {
                    write!(
                        self.out,
                        "console.warn('{}#{} not implemented')",
                        td.name(),
                        method_name
                    )?;
                }
                writeln!(self.out)?;
                writeln!(self.out, "    }}")?;
            } else {
                writeln!(self.out, ";")?;
            }
        }
        Ok(())
    }

    /// The rendered return type: the return signature when there are no
    /// out parameters, a sole out parameter standing in for a void return,
    /// or a structured record combining the return value with every out
    /// parameter.
    fn return_type_name(&mut self, sig: &MethodSig, out_params: &[SigParam]) -> Result<String> {
        if out_params.is_empty() {
            if let Some(ret) = &sig.return_sig {
                let semantics = semantics::of_type(&ret.ty, self.cache)?;
                let mut name = self.projection_type_name(&semantics, false, true)?;
                if ret.is_array {
                    name.push_str("[]");
                }
                return Ok(name);
            }
            return Ok("void".to_string());
        }

        if out_params.len() == 1 && sig.return_sig.is_none() {
            let out = &out_params[0];
            let semantics = semantics::of_type(&out.ty, self.cache)?;
            let mut name = self.projection_type_name(&semantics, false, true)?;
            if out.is_array {
                name.push_str("[]");
            }
            return Ok(name);
        }

        let mut fields = Vec::new();
        if let Some(ret) = &sig.return_sig {
            let semantics = semantics::of_type(&ret.ty, self.cache)?;
            let mut rendered = self.projection_type_name(&semantics, false, true)?;
            if ret.is_array {
                rendered.push_str("[]");
            }
            fields.push(format!(
                "{}: {rendered}",
                policy::normalize_member(&sig.return_param_name("returnValue"))
            ));
        }
        for out in out_params {
            let semantics = semantics::of_type(&out.ty, self.cache)?;
            let mut rendered = self.projection_type_name(&semantics, false, true)?;
            if out.is_array {
                rendered.push_str("[]");
            }
            fields.push(format!(
                "{}: {rendered}",
                policy::normalize_member(&out.name)
            ));
        }
        Ok(format!("{{ {} }}", fields.join(", ")))
    }

    fn parameter_list(&mut self, sig: &MethodSig, skip_first: bool) -> Result<String> {
        let mut rendered = Vec::new();
        for param in sig.params.iter().skip(usize::from(skip_first)) {
            if param.flags.contains(ParamAttributes::Out) {
                continue;
            }
            let semantics = semantics::of_type(&param.ty, self.cache)?;
            let mut s = format!(
                "{}: {}",
                policy::normalize_member(&param.name),
                self.projection_type_name(&semantics, false, true)?
            );
            if param.is_array {
                s.push_str("[]");
            }
            rendered.push(s);
        }
        Ok(rendered.join(", "))
    }

    fn write_event_list(&mut self, td: TypeDef, is_interface: bool) -> Result<()> {
        let events = self.cache.events(td);
        if events.is_empty() {
            return Ok(());
        }
        let mut any_static = false;
        let mut any_nonstatic = false;
        if !is_interface {
            writeln!(self.out)?;
        }
        for event in &events {
            let handler_semantics = semantics::of_type(&event.handler, self.cache)?;
            let handler_name = self.type_name(&handler_semantics, false)?;
            let member = policy::normalize_member(&event.name);
            let array_name = format!("__{member}");
            let hook_name = member.to_lowercase();
            let is_static = event.is_static();
            if is_static {
                any_static = true;
            } else {
                any_nonstatic = true;
            }

            if is_interface {
                if is_static {
                    write!(self.out, "static ")?;
                }
                writeln!(self.out, "    on{hook_name}: {handler_name};")?;
            } else {
                let this_str = if is_static {
                    format!("{}.", self.typedef_name(td, false, false)?)
                } else {
                    "this.".to_string()
                };
                write!(self.out, "    private ")?;
                if is_static {
                    write!(self.out, "static ")?;
                }
                writeln!(self.out, "{array_name}: Set<{handler_name}> = new Set();")?;
                if self.options.enable_decorators {
                    self.imported_types
                        .insert("Windows.Foundation.Interop.Enumerable".to_string());
                    writeln!(self.out, "    @Enumerable(true)")?;
                }
                write!(self.out, "    ")?;
                if is_static {
                    write!(self.out, "static ")?;
                }
                writeln!(self.out, "set on{hook_name}(handler: {handler_name}) {{")?;
                writeln!(self.out, "        {this_str}{array_name}.add(handler);")?;
                writeln!(self.out, "    }}")?;
                writeln!(self.out)?;
            }
        }

        if any_nonstatic {
            self.write_event_listener_function(td, "add", "add", false, is_interface)?;
            if !is_interface {
                writeln!(self.out)?;
            }
            self.write_event_listener_function(td, "remove", "delete", false, is_interface)?;
        }
        if any_static {
            self.write_event_listener_function(td, "static add", "add", true, is_interface)?;
            if !is_interface {
                writeln!(self.out)?;
            }
            self.write_event_listener_function(td, "static remove", "delete", true, is_interface)?;
        }
        Ok(())
    }

    fn write_event_listener_function(
        &mut self,
        td: TypeDef,
        name: &str,
        method: &str,
        do_static: bool,
        is_interface: bool,
    ) -> Result<()> {
        write!(self.out, "    {name}EventListener(name: string, handler: any)")?;
        if is_interface {
            writeln!(self.out)?;
            return Ok(());
        }
        writeln!(self.out, " {{")?;
        writeln!(self.out, "        switch (name) {{")?;

        let this_str = if do_static {
            format!("{}.", self.typedef_name(td, false, false)?)
        } else {
            "this.".to_string()
        };
        for event in self.cache.events(td) {
            if event.is_static() != do_static {
                continue;
            }
            let member = policy::normalize_member(&event.name);
            writeln!(self.out, "            case '{}':", member.to_lowercase())?;
            writeln!(self.out, "                {this_str}__{member}.{method}(handler);")?;
            writeln!(self.out, "                break;")?;
        }

        // Instance listeners forward unknown names to an event-bearing base.
        if !do_static {
            if let Some((namespace, base_name)) = self.cache.extends(td) {
                if let Some(base) = self.cache.find(&namespace, &base_name) {
                    if !self.cache.events(base).is_empty() {
                        writeln!(self.out, "            default:")?;
                        writeln!(
                            self.out,
                            "                super.{name}EventListener(name, handler);"
                        )?;
                        writeln!(self.out, "                break;")?;
                    }
                }
            }
        }

        writeln!(self.out, "        }}")?;
        writeln!(self.out, "    }}")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Name rendering
    // -----------------------------------------------------------------------

    /// Run `f` against the type definition behind `semantics`; an
    /// instantiation's arguments are on the generic stack for the duration.
    fn for_typedef<R>(
        &mut self,
        semantics: &TypeSemantics,
        f: impl FnOnce(&mut Self, TypeDef) -> Result<R>,
    ) -> Result<R> {
        match semantics {
            TypeSemantics::Definition(td) => f(self, *td),
            TypeSemantics::Instance(instance) => {
                self.generic_args.push_instance(instance);
                let result = f(self, instance.generic);
                self.generic_args.pop();
                result
            }
            _ => bail!("type definition expected"),
        }
    }

    /// Render a definition or instantiation with its generic parameter
    /// list, e.g. `IVector<T>` at its declaration site.
    fn type_name(&mut self, semantics: &TypeSemantics, relative: bool) -> Result<String> {
        self.for_typedef(semantics, |w, td| {
            Ok(format!(
                "{}{}",
                w.typedef_name(td, relative, false)?,
                w.generic_type_params(td)?
            ))
        })
    }

    fn definition_with_params(&mut self, td: TypeDef) -> Result<String> {
        Ok(format!(
            "{}{}",
            self.typedef_name(td, false, false)?,
            self.generic_type_params(td)?
        ))
    }

    /// Render a type definition's projected name, recording it in the
    /// imports set. The generic arity suffix is stripped from the rendered
    /// name; the unmodified fully-qualified name is the import key.
    fn typedef_name(&mut self, td: TypeDef, relative: bool, fully_projected: bool) -> Result<String> {
        if fully_projected {
            if let Some(mapped) = policy::mapped_type_name(td.namespace(), td.name()) {
                return Ok(mapped.to_string());
            }
        }

        self.imported_types
            .insert(format!("{}.{}", td.namespace(), td.name()));

        let name = strip_arity(td.name());
        if !relative {
            return Ok(name.to_string());
        }

        let mut bits: Vec<&str> = td.namespace().split('.').collect();
        bits.push(name);
        let mut i = 0;
        while i < self.stack.len() && i < bits.len() && bits[i] == self.stack[i] {
            i += 1;
        }
        let mut rendered = bits[i..].join(".");
        rendered.push_str(&self.generic_type_params(td)?);
        Ok(rendered)
    }

    /// Render the declared generic parameter slots of a definition by
    /// resolving each through the active stack.
    fn generic_type_params(&mut self, td: TypeDef) -> Result<String> {
        let count = self.cache.generic_param_names(td).len();
        if count == 0 {
            return Ok(String::new());
        }
        let mut parts = Vec::new();
        for index in 0..count {
            let (semantics, _) = self.generic_args.resolve(index as u32)?;
            parts.push(self.projection_type_name(&semantics, false, false)?);
        }
        Ok(format!("<{}>", parts.join(", ")))
    }

    fn generic_instance_name(
        &mut self,
        instance: &GenericInstance,
        relative: bool,
        fully_projected: bool,
    ) -> Result<String> {
        self.generic_args.push_instance(instance);
        let result = self.generic_instance_name_inner(instance, relative, fully_projected);
        self.generic_args.pop();
        result
    }

    fn generic_instance_name_inner(
        &mut self,
        instance: &GenericInstance,
        relative: bool,
        fully_projected: bool,
    ) -> Result<String> {
        // Nullable projection: IReference`1<T> is just `T | null` at use
        // sites.
        if fully_projected && instance.generic.name() == "IReference`1" {
            let (arg, _) = self.generic_args.resolve(0)?;
            let rendered = self.projection_type_name(&arg, relative, true)?;
            return Ok(format!("{rendered} | null"));
        }

        let mut rendered =
            self.projection_type_name(&TypeSemantics::Definition(instance.generic), relative, false)?;
        rendered.push('<');
        let mut first = true;
        for arg in &instance.args {
            match self.projection_type_name(arg, relative, false) {
                Ok(arg_rendered) => {
                    if !first {
                        rendered.push_str(", ");
                    }
                    rendered.push_str(&arg_rendered);
                    first = false;
                }
                Err(error) => {
                    // Tolerated: an unrenderable argument truncates the
                    // list rather than aborting the run.
                    warn!(
                        generic = instance.generic.name(),
                        error = %format!("{error:#}"),
                        "truncating unrenderable generic argument list"
                    );
                    break;
                }
            }
        }
        rendered.push('>');
        Ok(rendered)
    }

    fn generic_index_name(&mut self, index: u32, relative: bool) -> Result<String> {
        let (semantics, scope) = self.generic_args.resolve(index)?;
        let prior = self.generic_args.set_scope(scope);
        let result = self.projection_type_name(&semantics, relative, false);
        self.generic_args.set_scope(prior);
        result
    }

    /// Render any semantics as a projected type name.
    fn projection_type_name(
        &mut self,
        semantics: &TypeSemantics,
        relative: bool,
        fully_projected: bool,
    ) -> Result<String> {
        match semantics {
            TypeSemantics::Object | TypeSemantics::TypeMarker => Ok("any".to_string()),
            TypeSemantics::Guid => Ok("string".to_string()),
            TypeSemantics::Fundamental(kind) => {
                Ok(policy::fundamental_type_name(*kind).to_string())
            }
            TypeSemantics::Definition(td) => self.typedef_name(*td, relative, fully_projected),
            TypeSemantics::GenericIndex(index) => self.generic_index_name(*index, relative),
            TypeSemantics::GenericParamDef(name) => Ok(name.clone()),
            TypeSemantics::Instance(instance) => {
                self.generic_instance_name(instance, relative, fully_projected)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------------

    fn write_import(&mut self, type_name: &str, name_override: Option<&str>) -> Result<()> {
        let cache = self.cache;
        if let Some(td) = cache.find_full(type_name) {
            if !policy::should_project(cache, td, self.options) {
                // Direct references to unprojected types collapse to any.
                writeln!(self.out, "type {} = any", td.name())?;
                return Ok(());
            }
        }

        let bits: Vec<&str> = type_name.split('.').collect();
        let mut name = name_override
            .map(str::to_string)
            .unwrap_or_else(|| bits.last().copied().unwrap_or_default().to_string());

        // Windows.* types resolve through the aliased winrt/ root when
        // projecting a third-party assembly; everything else is imported by
        // filesystem-relative path.
        let path = if bits.first() == Some(&"Windows") && cache.assembly().name != "Windows" {
            format!("winrt/{}", bits.join("/"))
        } else {
            let current = self.path.parent().unwrap_or(&self.base_path);
            let mut target = self.base_path.clone();
            for bit in &bits {
                target.push(bit);
            }
            let rendered = relative_path(current, &target);
            if rendered.starts_with('.') {
                rendered
            } else {
                format!("./{rendered}")
            }
        };

        if let Some(backtick) = name.find('`') {
            name.truncate(backtick);
        }
        writeln!(self.out, "import {{ {name} }} from \"{path}\";")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Module index
    // -----------------------------------------------------------------------

    pub fn write_module(&mut self) -> Result<()> {
        let cache = self.cache;
        self.stack.clear();
        self.path = self.base_path.clone();
        if !self.path.exists() {
            fs::create_dir_all(&self.path)
                .with_context(|| format!("creating {}", self.path.display()))?;
        }
        self.path.push("index.ts");
        let file = fs::File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        self.out = Sink::File(BufWriter::new(file));

        self.write_header()?;

        for (namespace, types) in cache.namespaces() {
            if !cache.is_runtime_namespace(namespace) {
                continue;
            }
            for (type_name, td) in types {
                if !policy::should_project(cache, *td, self.options) {
                    continue;
                }
                let name = strip_arity(type_name);
                let alias = format!("{namespace}.{name}").replace('.', "_");
                let full_name = format!("{namespace}.{type_name}");
                self.write_import(&full_name, Some(&format!("{name} as {alias}")))?;
            }
        }
        writeln!(self.out)?;

        for (namespace, types) in cache.namespaces() {
            if !cache.is_runtime_namespace(namespace) {
                continue;
            }
            let parts: Vec<String> = namespace.split('.').map(str::to_string).collect();
            while self.stack.len() > parts.len()
                || self.stack.iter().zip(&parts).any(|(have, want)| have != want)
            {
                self.close_namespace_scope()?;
            }
            for part in &parts[self.stack.len()..] {
                writeln!(
                    self.out,
                    "{}export namespace {part} {{",
                    whitespace(self.stack.len())
                )?;
                self.stack.push(part.clone());
            }

            for (type_name, td) in types {
                let td = *td;
                if !policy::should_project(cache, td, self.options) {
                    continue;
                }
                let name = strip_arity(type_name);
                let alias = format!("{namespace}.{name}").replace('.', "_");
                // Classes and enums carry values; everything else re-exports
                // as a pure type.
                let export_kind = match cache.kind(td) {
                    TypeKind::Class | TypeKind::Enum => "const",
                    _ => "type",
                };
                let pushed = self
                    .generic_args
                    .push_params(&cache.generic_param_names(td));
                let line = (|| -> Result<String> {
                    let generic_params = self.generic_type_params(td)?;
                    let rendered = self.typedef_name(td, false, false)?;
                    Ok(format!(
                        "{}export {export_kind} {rendered}{generic_params} = {alias}{generic_params};",
                        whitespace(self.stack.len())
                    ))
                })();
                if pushed {
                    self.generic_args.pop();
                }
                writeln!(self.out, "{}", line?)?;
            }
        }

        while !self.stack.is_empty() {
            self.close_namespace_scope()?;
        }
        let assembly = &cache.assembly().name;
        writeln!(self.out, "globalThis['{assembly}'] = {assembly};")?;

        self.close_output()?;
        self.path.pop();
        Ok(())
    }

    fn close_namespace_scope(&mut self) -> Result<()> {
        self.stack.pop();
        writeln!(self.out, "{}}}", whitespace(self.stack.len()))?;
        Ok(())
    }
}

fn whitespace(depth: usize) -> String {
    " ".repeat(depth * 4)
}

fn strip_arity(name: &str) -> &str {
    name.split('`').next().unwrap_or(name)
}

/// Whether an existing file must be preserved: non-empty and not opening
/// with the `//` banner of a generated file.
fn preserve_existing(path: &Path) -> Result<bool> {
    let Ok(metadata) = fs::metadata(path) else {
        return Ok(false);
    };
    if metadata.len() < 2 {
        return Ok(false);
    }
    let mut header = [0u8; 2];
    let mut file =
        fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    file.read_exact(&mut header)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(&header != b"//")
}

/// Forward-slash relative path between two directories sharing the output
/// root.
fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|&(a, b)| a == b).count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}
