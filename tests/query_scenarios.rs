use sheet_query::services::excel::commands::sum_range;
use sheet_query::services::excel::utils::clean_headers;
use sheet_query::services::query::executor::{apply_filters, execute, PROVENANCE_COLUMN};
use sheet_query::services::query::plan::{FilterOp, FilterSpec, SortSpec, TargetSheets};
use sheet_query::services::text::{best_match, normalize};
use sheet_query::{answer_question, Cell, QueryPlan, Table, WorkbookIndex};

fn people() -> WorkbookIndex {
    WorkbookIndex::from_bytes("personas.csv", b"Nombre,Edad\nAna,30\nLuis,25\nAna,30\n").unwrap()
}

fn scores() -> Table {
    Table::from_rows(
        vec!["nombre".into(), "nota".into(), "edad".into()],
        vec![
            vec!["a".into(), Cell::Int(7), Cell::Int(20)],
            vec!["b".into(), Cell::Int(4), Cell::Int(35)],
            vec!["c".into(), Cell::Int(6), Cell::Int(28)],
            vec!["d".into(), Cell::Int(5), Cell::Int(41)],
            vec!["e".into(), Cell::Null, Cell::Int(19)],
        ],
    )
}

#[test]
fn duplicates_question_reports_repeated_value() {
    let out = answer_question(&people(), "duplicados", None);
    assert!(out.success);
    let table = out.dataframe.unwrap();
    assert_eq!(table.column_names(), vec!["column", "value", "count"]);
    assert_eq!(table.row(0), vec![&Cell::text("Nombre"), &Cell::text("Ana"), &Cell::Int(2)]);
}

#[test]
fn cell_range_sum() {
    let index = WorkbookIndex::from_bytes("a.csv", b"A,B\n10,x\n20,y\n").unwrap();
    let (_, table) = index.first_sheet().unwrap();
    assert_eq!(sum_range(table, "A2:A3").unwrap(), 30.0);
}

#[test]
fn grouped_average_sorted_by_metric() {
    let index = WorkbookIndex::from_bytes("v.csv", b"region,ventas\nNorte,10\nSur,50\nNorte,20\n").unwrap();
    let out = answer_question(&index, "promedio de ventas por region", None);
    assert!(out.success);
    let table = out.dataframe.unwrap();
    assert_eq!(table.column_names(), vec!["region", "ventas_mean"]);
    assert_eq!(table.nrows(), 2);
    assert_eq!(table.row(0), vec![&Cell::text("Sur"), &Cell::Float(50.0)]);
    assert_eq!(table.row(1), vec![&Cell::text("Norte"), &Cell::Float(15.0)]);
}

#[test]
fn unrecognised_question_without_llm_asks_for_detail() {
    let out = answer_question(&people(), "hola, que tal?", None);
    assert!(!out.success);
    assert!(out.message.contains("specifying columns or filters"));
    assert!(!out.used_llm);
}

#[test]
fn blank_and_repeated_headers_are_renamed() {
    let index = WorkbookIndex::from_bytes("h.csv", b"a,b,,d\n1,2,3,4\n").unwrap();
    let (_, table) = index.first_sheet().unwrap();
    assert_eq!(table.column_names(), vec!["a", "b", "Columna_3", "d"]);
    assert_eq!(clean_headers(&["x", "x", "x"]), vec!["x", "x_1", "x_2"]);
}

#[test]
fn filter_conjunction_equals_sequential_application() {
    let table = scores();
    let specs = [
        FilterSpec::new("nota", FilterOp::Gt, 4),
        FilterSpec::new("edad", FilterOp::Lt, 40),
        FilterSpec::new("nombre", FilterOp::Eq, "c"),
    ];
    for first in &specs {
        for second in &specs {
            let together = apply_filters(&table, &[first.clone(), second.clone()]);
            let stepwise = apply_filters(&apply_filters(&table, &[first.clone()]), &[second.clone()]);
            assert_eq!(together, stepwise, "{:?} then {:?}", first, second);
        }
    }
}

#[test]
fn limit_and_ascending_order_hold() {
    let index = WorkbookIndex::from_sheets(vec![("S".to_string(), scores())]);
    for limit in [0, 1, 3, 10] {
        let plan = QueryPlan {
            target_sheets: TargetSheets::Named(vec!["S".into()]),
            filters: vec![FilterSpec::new("edad", FilterOp::Gte, 20)],
            order_by: vec![SortSpec { column: "edad".into(), asc: true }],
            limit,
            ..QueryPlan::default()
        };
        let out = execute(&index, &plan, "");
        assert_eq!(out.nrows(), limit.min(4));
        assert!(out.has_column(PROVENANCE_COLUMN));
        let ages: Vec<f64> = out.column("edad").unwrap().cells.iter().filter_map(Cell::as_f64).collect();
        assert!(ages.windows(2).all(|w| w[0] <= w[1]), "{:?}", ages);
    }
}

#[test]
fn real_column_names_resolve_to_themselves() {
    let names = ["Nombre Completo", "Edad", "Fecha de Ingreso", "Región", "monto_total", "id"];
    for name in names {
        assert_eq!(best_match(name, &names), Some(name));
    }
}

#[test]
fn normalization_is_idempotent() {
    for s in ["  Árbol  GRANDE ", "ñandú", "Ｆｕｌｌ", "", "déjà\tvu", "İstanbul"] {
        let once = normalize(s);
        assert_eq!(normalize(&once), once);
    }
}
