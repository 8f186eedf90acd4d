// Snapshot tests for the physical model dump and emitted JSON fragments.
//
// The dump is the diagnostic view printed by `ltp --emit physical-dump`; pinning
// it catches ordering and numbering drift that field-level assertions miss.

mod common;

use common::{oper, placed, transform, AppBuilder};

/// Src (PE 0) → Filter (PE 1, width 2) → Snk (PE 2).
fn two_channel_pipeline() -> ltp::adl::Application {
    let mut b = AppBuilder::new("Snapshot");
    let main = b.main();
    let src = b.primitive(main, "Src", 0, 0, 1);
    let filter = b.primitive(main, "Filter", 1, 1, 1);
    let snk = b.primitive(main, "Snk", 2, 1, 0);
    b.connect(src, 0, filter, 0);
    b.connect(filter, 0, snk, 0);
    b.parallel(filter, 2);
    b.build()
}

#[test]
fn physical_dump_of_two_channel_pipeline() {
    let (_, physical) = placed(&two_channel_pipeline());
    let dump = ltp::dump::physical_model(&physical).unwrap();
    insta::assert_snapshot!(dump, @r###"
    physical model
      pe 0 logical=0 operators=[0]
        out 0 oper=0:0 splitter=0 channel=0 static=[1:0]
        out 1 oper=0:0 splitter=0 channel=1 static=[3:0]
      pe 1 logical=1 region=0 channel=0 operators=[1]
        in 0 oper=1:0 static=[0:0]
        out 0 oper=1:0 static=[2:0]
      pe 2 logical=2 operators=[2]
        in 0 oper=2:0 static=[1:0, 3:0]
      pe 3 logical=1 region=0 channel=1 operators=[3]
        in 0 oper=3:0 static=[0:1]
        out 0 oper=3:0 static=[2:0]
      oper 0 "Src" logical=0 pe=0 singleThreaded=true/true
        out 0 stream="SrcOut0"
          splitter 0 iport=0 region=0
            channel 0
              0:0 -> 1:0 (input)
            channel 1
              0:0 -> 3:0 (input)
      oper 1 "Filter[0]" logical=1 pe=1 singleThreaded=true/true
        in 0
          1:0 -> 0:0 (output) splitter=0 channel=0
        out 0 stream="FilterOut0[0]"
          1:0 -> 2:0 (input)
      oper 2 "Snk" logical=2 pe=2 singleThreaded=true/true
        in 0
          2:0 -> 1:0 (output)
          2:0 -> 3:0 (output)
      oper 3 "Filter[1]" logical=1 pe=3 replica singleThreaded=true/true
        in 0
          3:0 -> 0:0 (output) splitter=0 channel=1
        out 0 stream="FilterOut0[1]"
          3:0 -> 2:0 (input)
    "###);
}

#[test]
fn splitter_pe_port_connection_json() {
    let out = transform(&two_channel_pipeline());
    let port = &out.pes[0].output_ports[1];
    insta::assert_json_snapshot!(port.oper_instance_connection, @r###"
    {
      "operInstanceIndex": 0,
      "oportIndex": 0,
      "splitterIndex": 0,
      "channelIndex": 1
    }
    "###);
}

#[test]
fn replica_input_connection_json() {
    let out = transform(&two_channel_pipeline());
    let conn = &oper(&out, 3).input_ports[0].inter_pe_connections[0];
    insta::assert_json_snapshot!(conn, @r###"
    {
      "operInstanceIndex": 0,
      "oportIndex": 0,
      "splitterIndex": 0,
      "channelIndex": 1,
      "pePortIndex": 0
    }
    "###);
}
