use ndarray::array;

use crate::solver::callback::{
    packed_to_dense, BlacsDescriptor, DataType, LocalGather, MatrixCollector, MatrixDelivery,
    MatrixDescriptor, MatrixKind, MatrixType, StorageType,
};

fn delivery<'a>(data: Option<&'a [f64]>, n_basis: usize, descriptor: MatrixDescriptor) -> MatrixDelivery<'a> {
    MatrixDelivery {
        k_point: 1,
        spin: 1,
        n_basis,
        blacs: None,
        data,
        descriptor,
    }
}

#[test]
fn test_callback_packed_upper_and_lower() {
    let expected = array![[1.0, 2.0, 4.0], [2.0, 3.0, 5.0], [4.0, 5.0, 6.0]];
    let upper = packed_to_dense(
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        3,
        StorageType::UpperTriangularPacked,
    )
    .unwrap();
    assert_eq!(upper, expected);
    let lower = packed_to_dense(
        &[1.0, 2.0, 4.0, 3.0, 5.0, 6.0],
        3,
        StorageType::LowerTriangularPacked,
    )
    .unwrap();
    assert_eq!(lower, expected);
    assert!(packed_to_dense(&[1.0, 2.0], 3, StorageType::LowerTriangularPacked).is_err());
}

#[test]
fn test_callback_dense_is_column_major() {
    let mut collector = MatrixCollector::new("dense");
    let data = [1.0, 2.0, 3.0, 4.0];
    let blacs = BlacsDescriptor([1, 0, 2, 2, 2, 2, 0, 0, 2]);
    let mut dlv = delivery(Some(&data), 2, MatrixDescriptor::dense());
    dlv.blacs = Some(&blacs);
    collector.deliver(MatrixKind::Hamiltonian, dlv, &LocalGather);
    let (hams, dms) = collector.finish().unwrap();
    assert_eq!(hams.count(), 1);
    assert!(dms.is_empty());
    assert_eq!(hams.get(1, 1, 1).unwrap(), &array![[1.0, 3.0], [2.0, 4.0]]);
}

#[test]
fn test_callback_counters_are_independent() {
    let mut collector = MatrixCollector::new("counters");
    let packed = [1.0, 0.5, 2.0];
    let descr = MatrixDescriptor::packed(StorageType::LowerTriangularPacked);
    collector.deliver(MatrixKind::Hamiltonian, delivery(Some(&packed), 2, descr), &LocalGather);
    collector.deliver(MatrixKind::DensityMatrix, delivery(Some(&packed), 2, descr), &LocalGather);
    collector.deliver(MatrixKind::Hamiltonian, delivery(Some(&packed), 2, descr), &LocalGather);
    // A rank holding no data stores nothing and does not advance the counter.
    collector.deliver(MatrixKind::Hamiltonian, delivery(None, 2, MatrixDescriptor::dense()), &LocalGather);
    let (hams, dms) = collector.finish().unwrap();
    assert_eq!(hams.count(), 2);
    assert_eq!(dms.count(), 1);
    assert!(hams.get(2, 1, 1).is_some());
    assert!(hams.get(3, 1, 1).is_none());
    assert_eq!(dms.get(1, 1, 1).unwrap(), &array![[1.0, 0.5], [0.5, 2.0]]);
}

#[test]
fn test_callback_first_error_wins() {
    let mut collector = MatrixCollector::new("errors");
    let packed = [1.0, 0.5, 2.0];
    let generic = MatrixDescriptor {
        storage_type: StorageType::UpperTriangularPacked,
        matrix_type: MatrixType::Generic,
        data_type: DataType::Real,
    };
    collector.deliver(MatrixKind::Hamiltonian, delivery(Some(&packed), 2, generic), &LocalGather);
    let complex = MatrixDescriptor {
        data_type: DataType::Complex,
        ..MatrixDescriptor::dense()
    };
    collector.deliver(MatrixKind::DensityMatrix, delivery(Some(&packed), 2, complex), &LocalGather);
    let err = collector.error().unwrap().to_string();
    assert!(err.contains("Hermitian"));
    assert!(!err.contains("real"));
    assert!(collector.finish().is_err());
}

#[test]
fn test_callback_rejects_complex_and_bad_shapes() {
    let mut collector = MatrixCollector::new("complex");
    let data = [1.0; 8];
    let complex = MatrixDescriptor {
        data_type: DataType::Complex,
        ..MatrixDescriptor::dense()
    };
    collector.deliver(MatrixKind::Hamiltonian, delivery(Some(&data), 2, complex), &LocalGather);
    assert!(collector.error().is_some());

    let mut collector = MatrixCollector::new("shape");
    let data = [1.0; 3];
    collector.deliver(
        MatrixKind::Hamiltonian,
        delivery(Some(&data), 2, MatrixDescriptor::dense()),
        &LocalGather,
    );
    assert!(collector.finish().is_err());
}
