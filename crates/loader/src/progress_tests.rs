use super::*;

#[test]
fn reports_at_most_once_per_interval() {
    let t0 = Instant::now();
    let mut meter = ProgressMeter::new(3, Duration::from_secs(10), t0);

    // (seconds since start, total rows, expected report)
    let cases: &[(u64, u64, Option<(u64, f64)>)] = &[
        (1, 100, None),
        (9, 900, None),
        (10, 1000, Some((1000, 100.0))),
        (15, 1500, None),
        (20, 1500, Some((1500, 50.0))),
        (40, 1700, Some((1700, 10.0))),
    ];

    for &(secs, rows, expected) in cases {
        let got = meter.observe(rows, t0 + Duration::from_secs(secs));
        let got = got.map(|p| {
            assert_eq!(p.worker, 3);
            (p.total_rows, p.rows_per_sec)
        });
        assert_eq!(got, expected, "at {secs}s with {rows} rows");
    }
}

#[test]
fn zero_interval_never_divides_by_zero() {
    let t0 = Instant::now();
    let mut meter = ProgressMeter::new(0, Duration::ZERO, t0);
    assert_eq!(meter.observe(5, t0), None);

    let p = meter
        .observe(10, t0 + Duration::from_millis(500))
        .expect("report");
    assert_eq!(p.rows_per_sec, 20.0);
}
