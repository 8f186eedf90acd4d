// Imported and exported stream tests.
//
// Import and Export operators inside a parallel region are replicated with
// it; every replica's PE port carries the stream declarations with the
// channel intrinsics resolved for that replica's channel.

mod common;

use common::{oper, pe_of, transform, AppBuilder};
use ltp::adl;

const SUBSCRIPTION: &str = "kind == \"ticks\" && shard == getChannel()";
const FILTER: &str = "seq % getMaxChannels() == getChannel()";

/// Par (width 4) holds Imp → Work → Exp. Work runs in PE 0.
fn parallel_streams(imports: adl::ImportedStreams) -> adl::Application {
    let mut b = AppBuilder::new("Streams");
    let main = b.main();
    let par = b.composite(main, "Par", 0, 0);
    let work = b.primitive(par, "Work", 0, 1, 1);
    let imp = b.import(par, "Imp");
    let exp = b.export(par, "Exp");
    b.connect(imp, 0, work, 0);
    b.connect(work, 0, exp, 0);
    b.parallel(par, 4);

    let mut imports = imports;
    let name = b.full_name(imp);
    if let Some(p) = imports.property_based_import.as_mut() {
        p.import_oper_name = name.clone();
    }
    for n in &mut imports.name_based_imports {
        n.import_oper_name = name.clone();
    }
    b.subscribe(work, 0, imports);
    let export_oper_name = b.full_name(exp);
    b.publish(
        work,
        0,
        adl::ExportedStream {
            export_oper_name,
            name: Some("out_getChannel()".into()),
            allow_filter: Some(true),
            properties: vec![adl::StreamProperty {
                name: "shard".into(),
                property_type: "int64".into(),
                values: vec!["getChannel()".into()],
            }],
        },
    );
    b.build()
}

fn property_based() -> adl::ImportedStreams {
    adl::ImportedStreams {
        filter: Some(FILTER.into()),
        name_based_imports: Vec::new(),
        property_based_import: Some(adl::PropertyBasedImport {
            import_oper_name: String::new(),
            subscription: SUBSCRIPTION.into(),
            application_scope: None,
        }),
    }
}

#[test]
fn property_subscription_is_evaluated_per_channel() {
    let out = transform(&parallel_streams(property_based()));
    assert_eq!(out.pes.len(), 4);

    // Channel 2 of the region lives in the second PE replica.
    let pe = pe_of(&out, 2);
    assert_eq!(pe.index, 2);
    assert_eq!(pe.input_ports.len(), 1);
    let port = &pe.input_ports[0];
    assert!(port.static_connections.is_empty());
    assert_eq!(port.oper_instance_connection.oper_instance_index, 2);

    let imported = port.imported_streams.as_ref().expect("imported streams");
    let pbi = imported.property_based_import.as_ref().expect("property-based import");
    assert_eq!(pbi.index, 0);
    assert_eq!(pbi.subscription, "kind == \"ticks\" && shard == 2");
    assert_eq!(pbi.logical_subscription, SUBSCRIPTION);
    assert_eq!(pbi.import_oper_name, "Par[2].Imp");
    assert_eq!(pbi.logical_import_oper_name, "Par.Imp");
    assert_eq!(pbi.application_scope, None);
    assert_eq!(imported.filter.as_deref(), Some("seq % 4 == 2"));
    assert_eq!(imported.logical_filter.as_deref(), Some(FILTER));
}

#[test]
fn every_channel_resolves_its_own_subscription() {
    let out = transform(&parallel_streams(property_based()));
    for channel in 0..4u64 {
        let pe = pe_of(&out, channel);
        let imported = pe.input_ports[0].imported_streams.as_ref().unwrap();
        let expected = format!("kind == \"ticks\" && shard == {}", channel);
        assert_eq!(
            imported.property_based_import.as_ref().unwrap().subscription,
            expected
        );
    }
}

#[test]
fn name_based_imports_are_numbered_from_one() {
    let imports = adl::ImportedStreams {
        filter: None,
        name_based_imports: vec![adl::NameBasedImport {
            import_oper_name: String::new(),
            application_name: "Upstream".into(),
            stream_name: "feed_getChannel()".into(),
            application_scope: Some("Prod".into()),
        }],
        property_based_import: None,
    };
    let out = transform(&parallel_streams(imports));
    let imported = pe_of(&out, 3).input_ports[0].imported_streams.as_ref().unwrap();
    assert_eq!(imported.name_based_imports.len(), 1);
    let nbi = &imported.name_based_imports[0];
    assert_eq!(nbi.index, 1);
    assert_eq!(nbi.stream_name, "feed_3");
    assert_eq!(nbi.logical_stream_name, "feed_getChannel()");
    assert_eq!(nbi.application_name, "Upstream");
    assert_eq!(nbi.application_scope.as_deref(), Some("Prod"));
    assert_eq!(imported.filter, None);
}

#[test]
fn exported_stream_properties_are_substituted() {
    let out = transform(&parallel_streams(property_based()));
    let pe = pe_of(&out, 1);
    assert_eq!(pe.output_ports.len(), 1);
    let port = &pe.output_ports[0];
    assert!(port.static_connections.is_empty());
    assert_eq!(port.oper_instance_connection.splitter_index, None);

    let exported = port.exported_stream.as_ref().expect("exported stream");
    assert_eq!(exported.export_oper_name, "Par[1].Exp");
    assert_eq!(exported.logical_export_oper_name, "Par.Exp");
    assert_eq!(exported.name.as_deref(), Some("out_1"));
    assert_eq!(exported.logical_name.as_deref(), Some("out_getChannel()"));
    assert_eq!(exported.allow_filter, Some(true));
    assert_eq!(exported.properties[0].values, vec!["1".to_string()]);
    assert_eq!(exported.properties[0].logical_values, vec!["getChannel()".to_string()]);

    // The producing operator's port has no edges, only the PE port.
    let work = oper(&out, 1);
    assert!(work.output_ports[0].inter_pe_connections.is_empty());
    assert!(work.output_ports[0].intra_pe_connections.is_empty());
}

#[test]
fn bad_subscription_is_an_expression_error() {
    let mut imports = property_based();
    imports.property_based_import.as_mut().unwrap().subscription = "shard == ".into();
    let err = ltp::transform(&parallel_streams(imports), ltp::TransformOptions::default())
        .unwrap_err();
    assert!(matches!(err, ltp::TransformError::Expression { .. }));
}

#[test]
fn export_without_declaration_is_internal() {
    let mut b = AppBuilder::new("Undeclared");
    let main = b.main();
    let src = b.primitive(main, "Src", 0, 0, 1);
    let exp = b.export(main, "Exp");
    b.connect(src, 0, exp, 0);
    let err = ltp::transform(&b.build(), ltp::TransformOptions::default()).unwrap_err();
    assert!(err.is_internal());
}
