//! End-to-end projection tests: build a winmd in-process, project it into
//! a temp directory, and verify the emitted TypeScript.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use windows_metadata::{
    FieldAttributes, MethodAttributes, MethodCallAttributes, MethodImplAttributes,
    ParamAttributes, Signature, Type, TypeAttributes, Value,
    writer::{File, HasConstant, TypeDefOrRef},
};

static TESTLIB_WINMD: LazyLock<Vec<u8>> = LazyLock::new(build_winmd);

/// The shared projection of the fixture: `(tempdir, <out>/TestLib)`.
static OUTPUT: LazyLock<(tempfile::TempDir, PathBuf)> = LazyLock::new(|| {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = project_into(dir.path());
    (dir, base)
});

fn project_into(out_dir: &Path) -> PathBuf {
    let winmd_path = out_dir.join("TestLib.winmd");
    std::fs::write(&winmd_path, TESTLIB_WINMD.clone()).expect("write winmd");
    let options = tswinmd::config::Options::default();
    tswinmd::run(&[winmd_path], &options, out_dir).expect("project TestLib")
}

fn read(relative: &str) -> String {
    let path = OUTPUT.1.join(relative);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {relative}: {e}"))
}

fn build_winmd() -> Vec<u8> {
    let mut file = File::new("TestLib");

    let enum_ref = file.TypeRef("System", "Enum");
    let valuetype_ref = file.TypeRef("System", "ValueType");
    let object_ref = file.TypeRef("System", "Object");
    let delegate_ref = file.TypeRef("System", "MulticastDelegate");

    let winrt = TypeAttributes::Public | TypeAttributes::WindowsRuntime;
    let void_sig = |types: Vec<Type>| Signature {
        flags: MethodCallAttributes::default(),
        return_type: Type::Void,
        types,
    };
    let ret_sig = |return_type: Type, types: Vec<Type>| Signature {
        flags: MethodCallAttributes::default(),
        return_type,
        types,
    };

    // Alpha.Beta.Status — enum with out-of-order values.
    file.TypeDef(
        "Alpha.Beta",
        "Status",
        TypeDefOrRef::TypeRef(enum_ref),
        winrt | TypeAttributes::Sealed,
    );
    file.Field(
        "value__",
        &Type::I32,
        FieldAttributes::Public | FieldAttributes::RTSpecialName | FieldAttributes::SpecialName,
    );
    for (name, value) in [("Canceled", 2), ("Completed", 1), ("Started", 0), ("Error", 3)] {
        let field = file.Field(
            name,
            &Type::I32,
            FieldAttributes::Public | FieldAttributes::Static | FieldAttributes::Literal,
        );
        file.Constant(HasConstant::Field(field), &Value::I32(value));
    }

    // Alpha.Beta.Point — struct.
    file.TypeDef(
        "Alpha.Beta",
        "Point",
        TypeDefOrRef::TypeRef(valuetype_ref),
        winrt | TypeAttributes::SequentialLayout,
    );
    file.Field("X", &Type::I32, FieldAttributes::Public);
    file.Field("Y", &Type::I32, FieldAttributes::Public);

    // Alpha.Beta.ChangedHandler — delegate; the sender parameter is
    // implicit in the projection.
    file.TypeDef(
        "Alpha.Beta",
        "ChangedHandler",
        TypeDefOrRef::TypeRef(delegate_ref),
        winrt | TypeAttributes::Sealed,
    );
    file.MethodDef(
        "Invoke",
        &void_sig(vec![Type::named("System", "Object"), Type::I32]),
        MethodAttributes::Public
            | MethodAttributes::Virtual
            | MethodAttributes::HideBySig
            | MethodAttributes::NewSlot
            | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("sender", 1, ParamAttributes::default());
    file.Param("value", 2, ParamAttributes::default());

    // Alpha.Beta.IWidget — interface with a getter-only property and a
    // method declaration.
    file.TypeDef(
        "Alpha.Beta",
        "IWidget",
        TypeDefOrRef::TypeRef(object_ref),
        winrt | TypeAttributes::Interface | TypeAttributes::Abstract,
    );
    file.MethodDef(
        "get_Title",
        &ret_sig(Type::String, vec![]),
        MethodAttributes::Public
            | MethodAttributes::Virtual
            | MethodAttributes::Abstract
            | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        "GetName",
        &ret_sig(Type::String, vec![]),
        MethodAttributes::Public | MethodAttributes::Virtual | MethodAttributes::Abstract,
        MethodImplAttributes::default(),
    );

    // Alpha.Beta.Widget — class with one ctor, methods and an event.
    file.TypeDef(
        "Alpha.Beta",
        "Widget",
        TypeDefOrRef::TypeRef(object_ref),
        winrt | TypeAttributes::Sealed,
    );
    file.MethodDef(
        ".ctor",
        &void_sig(vec![Type::I32, Type::String]),
        MethodAttributes::Public
            | MethodAttributes::HideBySig
            | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("value", 1, ParamAttributes::default());
    file.Param("name", 2, ParamAttributes::default());

    file.MethodDef(
        "GetName",
        &ret_sig(Type::String, vec![]),
        MethodAttributes::Public | MethodAttributes::HideBySig,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        "Reset",
        &void_sig(vec![]),
        MethodAttributes::Public | MethodAttributes::HideBySig,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        "Count",
        &ret_sig(Type::I32, vec![]),
        MethodAttributes::Public | MethodAttributes::HideBySig | MethodAttributes::Static,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        "Measure",
        &ret_sig(Type::I32, vec![Type::I32, Type::I32]),
        MethodAttributes::Public | MethodAttributes::HideBySig,
        MethodImplAttributes::default(),
    );
    file.Param("width", 1, ParamAttributes::default());
    file.Param("height", 2, ParamAttributes::Out);

    file.MethodDef(
        "add_Changed",
        &ret_sig(Type::I64, vec![Type::named("Alpha.Beta", "ChangedHandler")]),
        MethodAttributes::Public | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("handler", 1, ParamAttributes::default());
    file.MethodDef(
        "remove_Changed",
        &void_sig(vec![Type::I64]),
        MethodAttributes::Public | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("token", 1, ParamAttributes::default());

    // Alpha.Beta.Gadget — class with two constructor overloads.
    file.TypeDef(
        "Alpha.Beta",
        "Gadget",
        TypeDefOrRef::TypeRef(object_ref),
        winrt | TypeAttributes::Sealed,
    );
    file.MethodDef(
        ".ctor",
        &void_sig(vec![]),
        MethodAttributes::Public
            | MethodAttributes::HideBySig
            | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        ".ctor",
        &void_sig(vec![Type::Bool]),
        MethodAttributes::Public
            | MethodAttributes::HideBySig
            | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("flag", 1, ParamAttributes::default());

    // Alpha.Gamma.Holder — read-write property plus a cross-namespace
    // parameter type.
    file.TypeDef(
        "Alpha.Gamma",
        "Holder",
        TypeDefOrRef::TypeRef(object_ref),
        winrt | TypeAttributes::Sealed,
    );
    file.MethodDef(
        "get_Title",
        &ret_sig(Type::String, vec![]),
        MethodAttributes::Public | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.MethodDef(
        "put_Title",
        &void_sig(vec![Type::String]),
        MethodAttributes::Public | MethodAttributes::SpecialName,
        MethodImplAttributes::default(),
    );
    file.Param("value", 1, ParamAttributes::default());
    file.MethodDef(
        "UsePoint",
        &void_sig(vec![Type::named("Alpha.Beta", "Point")]),
        MethodAttributes::Public | MethodAttributes::HideBySig,
        MethodImplAttributes::default(),
    );
    file.Param("p", 1, ParamAttributes::default());

    file.into_stream()
}

// ---------------------------------------------------------------------------
// Per-category output
// ---------------------------------------------------------------------------

#[test]
fn enum_members_follow_the_running_counter() {
    let status = read("Alpha/Beta/Status.ts");
    assert!(status.starts_with("// ---"), "banner missing:\n{status}");
    assert!(status.contains("export enum Status {"));
    // Explicit initializers only where the metadata value diverges from
    // the running counter.
    assert!(status.contains("    canceled = 2,\n"));
    assert!(status.contains("    completed,\n"));
    assert!(status.contains("    started = 0,\n"));
    assert!(status.contains("    error,\n"));
    assert!(!status.contains("value__"), "value__ must not be projected");
}

#[test]
fn structs_project_as_interfaces() {
    let point = read("Alpha/Beta/Point.ts");
    assert!(point.contains("export interface Point {"));
    assert!(point.contains("    x: number;\n"));
    assert!(point.contains("    y: number;\n"));
}

#[test]
fn delegates_project_as_function_aliases() {
    let handler = read("Alpha/Beta/ChangedHandler.ts");
    assert!(
        handler.contains("export type ChangedHandler = (value: number) => void;"),
        "got:\n{handler}"
    );
}

#[test]
fn interfaces_declare_members_without_bodies() {
    let iwidget = read("Alpha/Beta/IWidget.ts");
    assert!(iwidget.contains("export interface IWidget {"));
    assert!(iwidget.contains("    readonly title: string;\n"));
    assert!(iwidget.contains("    getName(): string;\n"));
    assert!(!iwidget.contains("not implemented"), "no bodies in interfaces");
}

#[test]
fn single_ctor_is_emitted_with_a_warn_body() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(widget.contains("    constructor(value: number, name: string) {"));
    assert!(widget.contains("        console.warn('Widget.ctor not implemented')"));
}

#[test]
fn multiple_ctors_collapse_to_a_variadic_fallback() {
    let gadget = read("Alpha/Beta/Gadget.ts");
    assert!(gadget.contains("    // constructor();"));
    assert!(gadget.contains("    // constructor(flag: boolean);"));
    assert!(gadget.contains("    constructor(...args) { }"));
}

#[test]
fn class_methods_get_stub_bodies() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(widget.contains("@GenerateShim('Alpha.Beta.Widget')"));
    assert!(widget.contains("export class Widget {"));
    assert!(widget.contains("    getName(): string {"));
    assert!(widget.contains("        throw new Error('Widget#getName not implemented')"));
    assert!(widget.contains("    reset(): void {"));
    assert!(widget.contains("        console.warn('Widget#reset not implemented')"));
    assert!(widget.contains("    static count(): number {"));
}

#[test]
fn out_params_shape_a_structured_return() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(
        widget.contains("    measure(width: number): { returnValue: number, height: number } {"),
        "got:\n{widget}"
    );
}

#[test]
fn events_emit_backing_sets_and_listener_functions() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(widget.contains("    private __changed: Set<ChangedHandler> = new Set();"));
    assert!(widget.contains("    @Enumerable(true)"));
    assert!(widget.contains("    set onchanged(handler: ChangedHandler) {"));
    assert!(widget.contains("        this.__changed.add(handler);"));
    assert!(widget.contains("    addEventListener(name: string, handler: any) {"));
    assert!(widget.contains("            case 'changed':"));
    assert!(widget.contains("                this.__changed.delete(handler);"));
    assert!(widget.contains("    removeEventListener(name: string, handler: any) {"));
}

#[test]
fn properties_on_classes_are_null_initialized_fields() {
    let holder = read("Alpha/Gamma/Holder.ts");
    assert!(holder.contains("    title: string = null;"));
    assert!(
        !holder.contains("readonly title"),
        "read-write property must not be readonly"
    );
}

// ---------------------------------------------------------------------------
// Imports and layout
// ---------------------------------------------------------------------------

#[test]
fn sibling_types_import_by_relative_path() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(widget.contains("import { ChangedHandler } from \"./ChangedHandler\";"));
}

#[test]
fn cross_namespace_types_import_through_parent_paths() {
    let holder = read("Alpha/Gamma/Holder.ts");
    assert!(holder.contains("import { Point } from \"../Beta/Point\";"));
    assert!(holder.contains("    usePoint(p: Point): void {"));
}

#[test]
fn windows_types_import_through_the_winrt_alias() {
    let widget = read("Alpha/Beta/Widget.ts");
    assert!(widget.contains(
        "import { GenerateShim } from \"winrt/Windows/Foundation/Interop/GenerateShim\";"
    ));
    assert!(widget.contains(
        "import { Enumerable } from \"winrt/Windows/Foundation/Interop/Enumerable\";"
    ));
}

#[test]
fn import_names_never_carry_an_arity_suffix() {
    for relative in [
        "Alpha/Beta/Widget.ts",
        "Alpha/Gamma/Holder.ts",
        "index.ts",
    ] {
        let content = read(relative);
        for line in content.lines().filter(|l| l.starts_with("import {")) {
            let name = line
                .trim_start_matches("import {")
                .split('}')
                .next()
                .unwrap_or_default();
            assert!(!name.contains('`'), "arity suffix in {relative}: {line}");
        }
    }
}

#[test]
fn namespaces_map_to_directories() {
    assert!(OUTPUT.1.join("Alpha/Beta/Status.ts").exists());
    assert!(OUTPUT.1.join("Alpha/Gamma/Holder.ts").exists());
    assert!(OUTPUT.1.join("index.ts").exists());
}

// ---------------------------------------------------------------------------
// Module index
// ---------------------------------------------------------------------------

#[test]
fn index_reexports_every_projected_type() {
    let index = read("index.ts");
    assert!(index.contains(
        "import { Status as Alpha_Beta_Status } from \"./Alpha/Beta/Status\";"
    ));
    assert!(index.contains(
        "import { Holder as Alpha_Gamma_Holder } from \"./Alpha/Gamma/Holder\";"
    ));
    assert!(index.contains("export namespace Alpha {"));
    assert!(index.contains("    export namespace Beta {"));
    assert!(index.contains("    export namespace Gamma {"));
    // Value-carrying categories re-export as const, the rest as type.
    assert!(index.contains("        export const Status = Alpha_Beta_Status;"));
    assert!(index.contains("        export const Widget = Alpha_Beta_Widget;"));
    assert!(index.contains("        export type Point = Alpha_Beta_Point;"));
    assert!(index.contains("        export type IWidget = Alpha_Beta_IWidget;"));
    assert!(index.contains("        export type ChangedHandler = Alpha_Beta_ChangedHandler;"));
    assert!(index.ends_with("globalThis['TestLib'] = TestLib;\n"));
}

#[test]
fn index_closes_namespace_scopes_in_order() {
    let index = read("index.ts");
    let beta = index.find("export namespace Beta").expect("Beta scope");
    let gamma = index.find("export namespace Gamma").expect("Gamma scope");
    assert!(beta < gamma, "Beta closes before Gamma opens");
    assert!(index.contains("    }\n    export namespace Gamma {"));
}

// ---------------------------------------------------------------------------
// Overwrite protection and determinism
// ---------------------------------------------------------------------------

#[test]
fn hand_written_files_are_preserved() {
    let dir = tempfile::tempdir().expect("tempdir");
    let hand_written = dir.path().join("TestLib/Alpha/Beta/Point.ts");
    std::fs::create_dir_all(hand_written.parent().unwrap()).expect("mkdir");
    let seeded = "export interface Point { custom: true }\n";
    std::fs::write(&hand_written, seeded).expect("seed file");

    let base = project_into(dir.path());

    let preserved = std::fs::read_to_string(&hand_written).expect("read preserved");
    assert_eq!(preserved, seeded, "hand-written file must not change");

    let generated = std::fs::read_to_string(base.join("Alpha/Beta/Point.gen.ts"))
        .expect("generated sibling");
    assert!(generated.starts_with("//"));
    assert!(generated.contains("export interface Point {"));
}

#[test]
fn output_is_deterministic_modulo_the_timestamp() {
    let first_dir = tempfile::tempdir().expect("tempdir");
    let second_dir = tempfile::tempdir().expect("tempdir");
    let first = project_into(first_dir.path());
    let second = project_into(second_dir.path());

    for relative in [
        "Alpha/Beta/Status.ts",
        "Alpha/Beta/Widget.ts",
        "Alpha/Gamma/Holder.ts",
        "index.ts",
    ] {
        let strip = |path: &Path| -> String {
            std::fs::read_to_string(path)
                .expect("read output")
                .lines()
                .filter(|line| !line.starts_with("//     Generated from"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(
            strip(&first.join(relative)),
            strip(&second.join(relative)),
            "diverging output for {relative}"
        );
    }
}

// ---------------------------------------------------------------------------
// GUID unpacking
// ---------------------------------------------------------------------------

#[test]
fn guid_attribute_arguments_pack_little_endian() {
    use tswinmd::cache::TypeGuid;

    let args: Vec<(String, Value)> = [
        Value::U32(0x11223344),
        Value::U16(0x5566),
        Value::U16(0x7788),
        Value::U8(0x99),
        Value::U8(0xaa),
        Value::U8(0xbb),
        Value::U8(0xcc),
        Value::U8(0xdd),
        Value::U8(0xee),
        Value::U8(0xff),
        Value::U8(0x01),
    ]
    .into_iter()
    .map(|value| (String::new(), value))
    .collect();

    let guid = TypeGuid::from_args(&args).expect("well-formed guid");
    assert_eq!(
        guid.to_bytes(),
        [
            0x44, 0x33, 0x22, 0x11, // data1 little-endian
            0x66, 0x55, // data2 little-endian
            0x88, 0x77, // data3 little-endian
            0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x01,
        ]
    );
    assert_eq!(
        guid.to_string(),
        "11223344-5566-7788-99aa-bbccddeeff01"
    );
}

#[test]
fn truncated_guid_arguments_are_rejected() {
    use tswinmd::cache::TypeGuid;

    let args: Vec<(String, Value)> =
        vec![(String::new(), Value::U32(1)), (String::new(), Value::U16(2))];
    assert!(TypeGuid::from_args(&args).is_err());
}
